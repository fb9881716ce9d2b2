use garnet_engine::vm::ffi::{ForeignCallContext, Handle, NativeEnv, ReentryAction};
use garnet_engine::vm::interpreter::{backtrace, FrameRecord};
use garnet_engine::vm::model::StaticScope;
use garnet_engine::vm::object::{NativeFn, ObjectBody};
use garnet_engine::vm::{
    Executable, Invoker, NativeDispatcher, ObjectRef, SharedState, State, Symbol, Value, Visibility,
    VmError, VmOptions, VmResult,
};
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    static SEEN: RefCell<Vec<Rc<ForeignCallContext>>> = const { RefCell::new(Vec::new()) };
    static NAMES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn new_state() -> State {
    let _ = env_logger::builder().is_test(true).try_init();
    State::new(SharedState::new(VmOptions::default())).unwrap()
}

fn remember_current() {
    if let Some(context) = ForeignCallContext::current() {
        SEEN.with(|seen| seen.borrow_mut().push(context));
    }
}

fn seen() -> Vec<Rc<ForeignCallContext>> {
    SEEN.with(|seen| seen.borrow_mut().drain(..).collect())
}

/// Define `name` as a public native method on Object and return an instance
fn define(state: &mut State, name: &str, arity: i32, func: NativeFn) -> (Value, Symbol) {
    let world = state.world();
    let selector = world.symbols.intern(name);
    let object = world.model.object;
    let method = world
        .new_method(Executable::native(selector, arity, func))
        .unwrap();
    world
        .attach_method(selector, method, &StaticScope::top(object), Visibility::Public)
        .unwrap();
    let receiver = Value::Object(world.allocate_instance(object).unwrap());
    (receiver, selector)
}

fn string_of(state: &mut State, r: ObjectRef) -> String {
    match &state.world().heap.get(r).unwrap().body {
        ObjectBody::Str(s) => s.clone(),
        other => panic!("not a string: {:?}", other),
    }
}

// ============================================================================
// Handles Across Collections
// ============================================================================

fn allocate_and_collect(env: &mut NativeEnv<'_>, _: &[Handle]) -> VmResult<Value> {
    let original = env.world().new_string("hello")?;
    let handle = env.handle(Value::Object(original))?;

    env.state().collect_garbage();
    env.state().collect_garbage();

    let moved = env.resolve(handle)?;
    assert_ne!(moved, Value::Object(original));
    assert!(!env.world().heap.contains(original));
    Ok(moved)
}

#[test]
fn test_handles_follow_relocated_objects() {
    let mut state = new_state();
    let (receiver, selector) = define(&mut state, "build", 0, allocate_and_collect);

    let mut dispatcher = NativeDispatcher::new();
    let result = dispatcher.send(&mut state, receiver, selector, &[]).unwrap();

    let r = result.as_object().unwrap();
    assert_eq!(string_of(&mut state, r), "hello");
    assert_eq!(state.world().handle_roots.live_tables(), 0);
}

fn receiver_survives(env: &mut NativeEnv<'_>, args: &[Handle]) -> VmResult<Value> {
    let before = env.receiver()?;
    env.state().collect_garbage();
    let after = env.receiver()?;
    assert_ne!(before, after);
    assert_eq!(env.context().args()?.len(), args.len());
    Ok(after)
}

#[test]
fn test_call_bindings_are_rooted() {
    let mut state = new_state();
    let (receiver, selector) = define(&mut state, "relocate", 1, receiver_survives);
    let arg = Value::Object(state.world().new_string("argument").unwrap());

    let mut dispatcher = NativeDispatcher::new();
    let moved = dispatcher.send(&mut state, receiver, selector, &[arg]).unwrap();
    assert!(state.world().heap.contains(moved.as_object().unwrap()));
}

fn collect_then_read_arg(env: &mut NativeEnv<'_>, args: &[Handle]) -> VmResult<Value> {
    let before = env.resolve(args[0])?;
    env.state().collect_garbage();

    let after = env.arg(0)?;
    assert_ne!(before, after);
    assert_eq!(env.resolve(args[0])?, after);
    let r = after.as_object().unwrap();
    assert!(env.world().heap.get(r).is_some());
    Ok(after)
}

#[test]
fn test_arguments_follow_collection_inside_native() {
    let mut state = new_state();
    let (receiver, selector) = define(&mut state, "keep", 1, collect_then_read_arg);
    let arg = state.world().new_string("payload").unwrap();

    let mut dispatcher = NativeDispatcher::new();
    let result = dispatcher
        .send(&mut state, receiver, selector, &[Value::Object(arg)])
        .unwrap();

    let r = result.as_object().unwrap();
    assert_eq!(string_of(&mut state, r), "payload");
}

// ============================================================================
// Teardown
// ============================================================================

fn raise_after_handle(env: &mut NativeEnv<'_>, _: &[Handle]) -> VmResult<Value> {
    remember_current();
    env.handle(Value::Fixnum(1))?;
    Err(env.raise(Value::Fixnum(13)))
}

fn throw_after_handle(env: &mut NativeEnv<'_>, _: &[Handle]) -> VmResult<Value> {
    remember_current();
    Err(env.throw(Value::Nil, Value::Fixnum(2)))
}

fn return_normally(env: &mut NativeEnv<'_>, _: &[Handle]) -> VmResult<Value> {
    remember_current();
    Ok(Value::True)
}

#[test]
fn test_teardown_on_every_exit_path() {
    let mut state = new_state();
    let paths: [(&str, NativeFn); 3] = [
        ("raises", raise_after_handle),
        ("throws", throw_after_handle),
        ("returns", return_normally),
    ];

    for (name, func) in paths {
        let (receiver, selector) = define(&mut state, name, 0, func);
        let mut dispatcher = NativeDispatcher::new();
        let _ = dispatcher.send(&mut state, receiver, selector, &[]);

        let contexts = seen();
        assert_eq!(contexts.len(), 1, "{}", name);
        let context = &contexts[0];
        assert!(context.is_torn_down(), "{}", name);
        assert!(context.receiver().is_err(), "{}", name);
        assert!(ForeignCallContext::current().is_none(), "{}", name);
    }
}

#[test]
fn test_unwinds_reach_the_caller_unchanged() {
    let mut state = new_state();
    let (receiver, selector) = define(&mut state, "raises", 0, raise_after_handle);

    let mut dispatcher = NativeDispatcher::new();
    let err = dispatcher.send(&mut state, receiver, selector, &[]).unwrap_err();
    assert!(err.is_unwind());
    seen();
}

#[test]
fn test_handle_invalid_after_teardown() {
    let mut state = new_state();
    let guard = ForeignCallContext::allocate(&mut state).unwrap();
    let context = guard.context().clone();
    let handle = context.handle(Value::Fixnum(5)).unwrap();
    assert_eq!(context.resolve(handle).unwrap(), Value::Fixnum(5));

    guard.finish();
    assert!(matches!(
        context.resolve(handle),
        Err(VmError::InvalidHandle(_))
    ));
    assert!(context.handle(Value::Nil).is_err());
}

// ============================================================================
// Nesting and Unit Isolation
// ============================================================================

fn inner(env: &mut NativeEnv<'_>, _: &[Handle]) -> VmResult<Value> {
    remember_current();
    Ok(Value::Fixnum(env.context().frame().depth() as i64))
}

fn outer(env: &mut NativeEnv<'_>, _: &[Handle]) -> VmResult<Value> {
    remember_current();
    let world = env.world();
    let inner_sym = world.symbols.intern("inner");
    let receiver = env.receiver()?;

    let depth = env.send(receiver, inner_sym, &[])?;
    let current = ForeignCallContext::current().unwrap();
    assert!(Rc::ptr_eq(&current, env.context()));
    assert_eq!(env.context().action(), ReentryAction::OriginalCall);
    Ok(depth)
}

#[test]
fn test_nested_contexts_restore_previous() {
    let mut state = new_state();
    define(&mut state, "inner", 0, inner);
    let (receiver, selector) = define(&mut state, "outer", 0, outer);

    let mut dispatcher = NativeDispatcher::new();
    let depth = dispatcher.send(&mut state, receiver, selector, &[]).unwrap();
    assert_eq!(depth, Value::Fixnum(2));

    let contexts = seen();
    assert_eq!(contexts.len(), 2);
    let (outer_ctx, inner_ctx) = (&contexts[0], &contexts[1]);
    assert!(Rc::ptr_eq(inner_ctx.caller().unwrap(), outer_ctx.frame()));
    assert!(outer_ctx.is_torn_down());
    assert!(inner_ctx.is_torn_down());
    assert!(ForeignCallContext::current().is_none());
}

#[test]
fn test_out_of_order_teardown_keeps_current_consistent() {
    let mut state = new_state();
    let first = ForeignCallContext::allocate(&mut state).unwrap();
    let second = ForeignCallContext::allocate(&mut state).unwrap();
    let third = ForeignCallContext::allocate(&mut state).unwrap();
    let (first_ctx, third_ctx) = (first.context().clone(), third.context().clone());

    // Dropping a context below the top leaves the top current
    drop(second);
    let current = ForeignCallContext::current().unwrap();
    assert!(Rc::ptr_eq(&current, &third_ctx));

    // The top now restores the context the dropped one sat on
    drop(third);
    let current = ForeignCallContext::current().unwrap();
    assert!(Rc::ptr_eq(&current, &first_ctx));
    assert!(!current.is_torn_down());

    drop(first);
    assert!(ForeignCallContext::current().is_none());
}

#[test]
fn test_dropping_bottom_first_clears_current() {
    let mut state = new_state();
    let bottom = ForeignCallContext::allocate(&mut state).unwrap();
    let top = ForeignCallContext::allocate(&mut state).unwrap();

    drop(bottom);
    assert!(!ForeignCallContext::current().unwrap().is_torn_down());
    drop(top);
    assert!(ForeignCallContext::current().is_none());
}

#[test]
fn test_current_context_is_per_unit() {
    let mut state = new_state();
    let guard = ForeignCallContext::allocate(&mut state).unwrap();
    assert!(ForeignCallContext::current().is_some());

    let other = std::thread::spawn(|| {
        let mut state = new_state();
        let before = ForeignCallContext::current().is_none();
        let guard = ForeignCallContext::allocate(&mut state).unwrap();
        let unit = guard.unit();
        drop(guard);
        (before, unit)
    })
    .join()
    .unwrap();

    assert!(other.0);
    assert_ne!(other.1, state.unit());
    assert_eq!(guard.unit(), state.unit());
    drop(guard);
    assert!(ForeignCallContext::current().is_none());
}

// ============================================================================
// Bootstrap, Limits and Backtraces
// ============================================================================

#[test]
fn test_bootstrap_context_has_no_bindings() {
    let mut state = new_state();
    let guard = ForeignCallContext::allocate(&mut state).unwrap();
    assert!(guard.is_bootstrap());
    assert_eq!(guard.receiver().unwrap(), Value::Nil);
    assert_eq!(guard.name(), None);
    assert!(guard.args().unwrap().is_empty());
    assert_eq!(guard.method().unwrap(), None);
    assert_eq!(guard.stack_size(), state.options().stack_size);
    assert!(guard.frame().is_synthetic());
}

#[test]
fn test_oversized_stack_is_resource_exhaustion() {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = VmOptions {
        stack_size: 1 << 20,
        max_stack_size: 1 << 10,
        ..VmOptions::default()
    };
    let mut state = State::new(SharedState::new(options)).unwrap();
    assert!(matches!(
        ForeignCallContext::allocate(&mut state),
        Err(VmError::ResourceExhausted(_))
    ));
    assert!(ForeignCallContext::current().is_none());
}

#[test]
fn test_arity_is_checked_before_entry() {
    let mut state = new_state();
    let (receiver, selector) = define(&mut state, "returns", 0, return_normally);
    let mut dispatcher = NativeDispatcher::new();
    let err = dispatcher
        .send(&mut state, receiver, selector, &[Value::Nil])
        .unwrap_err();
    assert!(matches!(err, VmError::ArgumentCount { expected: 0, given: 1 }));
    assert!(seen().is_empty());
}

fn record_backtrace(env: &mut NativeEnv<'_>, _: &[Handle]) -> VmResult<Value> {
    let frames = backtrace(env.context().frame(), 0);
    let world = env.world();
    let names: Vec<String> = frames
        .iter()
        .filter_map(|f| f.name)
        .map(|s| world.symbols.resolve(s).to_string())
        .collect();
    NAMES.with(|n| *n.borrow_mut() = names);
    Ok(Value::Nil)
}

#[test]
fn test_backtrace_through_foreign_frames() {
    let mut state = new_state();
    let (receiver, selector) = define(&mut state, "puts", 0, record_backtrace);
    let main = state.world().symbols.intern("main");

    let caller = FrameRecord::interpreted(main, None, None);
    let mut dispatcher = NativeDispatcher::with_caller(caller);
    dispatcher.send(&mut state, receiver, selector, &[]).unwrap();

    let names = NAMES.with(|n| n.borrow().clone());
    assert_eq!(names, vec!["puts".to_string(), "main".to_string()]);
}
