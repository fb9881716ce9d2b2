use garnet_engine::jit::{CompilerState, JitInfo};
use garnet_engine::vm::model::StaticScope;
use garnet_engine::vm::{
    Executable, ModuleId, ObjectRef, SharedState, State, Value, Visibility, VmOptions,
};
use std::time::Duration;

fn new_state(background: bool) -> State {
    let _ = env_logger::builder().is_test(true).try_init();
    State::new(SharedState::new(VmOptions {
        jit_background: background,
        ..VmOptions::default()
    }))
    .unwrap()
}

/// `Animal#helper` plus `Animal#speak`, whose literals reference `helper`
fn define_methods(state: &mut State) -> (ModuleId, ObjectRef, ObjectRef) {
    let world = state.world();
    let helper_sym = world.symbols.intern("helper");
    let speak_sym = world.symbols.intern("speak");
    let animal_sym = world.symbols.intern("Animal");
    let animal = world.open_class(animal_sym, None, None).unwrap();
    let scope = StaticScope::top(animal);

    let helper = world
        .new_method(Executable::bytecode(helper_sym, vec![1, 2], Vec::new()))
        .unwrap();
    world
        .attach_method(helper_sym, helper, &scope, Visibility::Public)
        .unwrap();
    let speak = world
        .new_method(Executable::bytecode(
            speak_sym,
            vec![1, 2, 3, 4],
            vec![Value::Object(helper)],
        ))
        .unwrap();
    world
        .attach_method(speak_sym, speak, &scope, Visibility::Public)
        .unwrap();
    (animal, speak, helper)
}

fn method_named(state: &mut State, module: ModuleId, name: &str) -> ObjectRef {
    let world = state.world();
    let selector = world.symbols.intern(name);
    world
        .model
        .get(module)
        .local_method(selector)
        .and_then(|entry| entry.executable())
        .unwrap()
}

// ============================================================================
// Installation
// ============================================================================

#[test]
fn test_inline_compile_registers_holder() {
    let mut state = new_state(false);
    let (animal, speak, helper) = define_methods(&mut state);

    let id = state.compile_method(speak).unwrap().unwrap();
    let world = state.world();
    assert_eq!(world.heap.executable(speak).unwrap().jit, Some(id));
    assert!(world.code_cache.contains(id));
    assert_eq!(world.heap.executable(helper).unwrap().inliners, vec![speak]);

    let holder = world.code.holder(id).unwrap();
    let methods: Vec<_> = holder.runtime_data().iter().map(|rd| rd.method).collect();
    assert_eq!(methods, vec![speak, helper]);
    assert!(holder.runtime_data().iter().all(|rd| rd.module == animal));

    let info: JitInfo = world.code.jit_info();
    assert_eq!(info.methods_jitted, 1);
    assert_eq!(info.code_bytes, 4);
    assert_eq!(info.holders_live, 1);
    assert_eq!(info.holders_cleaned, 0);
}

#[test]
fn test_background_compile_installs_on_request() {
    let mut state = new_state(true);
    assert_eq!(state.shared().compiler().state(), CompilerState::Running);
    let (_, speak, _) = define_methods(&mut state);

    assert_eq!(state.compile_method(speak).unwrap(), None);
    assert!(state
        .shared()
        .compiler()
        .wait_for_results(1, Duration::from_secs(5)));
    assert_eq!(state.world().heap.executable(speak).unwrap().jit, None);

    assert_eq!(state.install_compiled(), 1);
    assert!(state.world().heap.executable(speak).unwrap().jit.is_some());
}

#[test]
fn test_result_for_moved_method_is_discarded() {
    let mut state = new_state(true);
    let (_, speak, _) = define_methods(&mut state);

    state.compile_method(speak).unwrap();
    assert!(state
        .shared()
        .compiler()
        .wait_for_results(1, Duration::from_secs(5)));

    // The method moves before the result is installed
    state.collect_garbage();
    assert_eq!(state.install_compiled(), 0);
    assert_eq!(state.world().code.jit_info().methods_jitted, 0);
}

#[test]
fn test_disabled_jit_compiles_nothing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut state = State::new(SharedState::new(VmOptions {
        jit_enabled: false,
        ..VmOptions::default()
    }))
    .unwrap();
    assert_eq!(state.shared().compiler().state(), CompilerState::Paused);
    let (_, speak, _) = define_methods(&mut state);
    assert_eq!(state.compile_method(speak).unwrap(), None);
    assert!(state.world().code.is_empty());
}

// ============================================================================
// Collection
// ============================================================================

#[test]
fn test_live_holder_survives_and_is_rewritten() {
    let mut state = new_state(false);
    let (animal, speak, helper) = define_methods(&mut state);
    let id = state.compile_method(speak).unwrap().unwrap();

    let stats = state.collect_garbage();
    assert_eq!(stats.code_resources_cleaned, 0);

    let new_speak = method_named(&mut state, animal, "speak");
    let new_helper = method_named(&mut state, animal, "helper");
    assert_ne!(new_speak, speak);
    assert_ne!(new_helper, helper);

    let world = state.world();
    assert!(world.code.contains(id));
    assert!(world.code_cache.contains(id));
    assert_eq!(world.heap.executable(new_speak).unwrap().jit, Some(id));
    assert_eq!(world.heap.executable(new_helper).unwrap().inliners, vec![new_speak]);

    let methods: Vec<_> = world
        .code
        .holder(id)
        .unwrap()
        .runtime_data()
        .iter()
        .map(|rd| rd.method)
        .collect();
    assert_eq!(methods, vec![new_speak, new_helper]);
}

#[test]
fn test_unreachable_holder_is_cleaned() {
    let mut state = new_state(false);
    let (animal, speak, _) = define_methods(&mut state);
    let id = state.compile_method(speak).unwrap().unwrap();

    let world = state.world();
    let speak_sym = world.symbols.intern("speak");
    world.undefine_method(animal, speak_sym).unwrap();
    // Undefining deoptimizes the method itself
    assert!(!world.code_cache.contains(id));

    let stats = state.collect_garbage();
    assert_eq!(stats.code_resources_cleaned, 1);

    let world = state.world();
    assert!(!world.code.contains(id));
    let info = world.code.jit_info();
    assert_eq!(info.holders_live, 0);
    assert_eq!(info.holders_cleaned, 1);
    assert_eq!(info.methods_jitted, 1);
}

#[test]
fn test_redefined_callee_releases_caller_code() {
    let mut state = new_state(false);
    let (animal, speak, helper) = define_methods(&mut state);
    let id = state.compile_method(speak).unwrap().unwrap();

    let world = state.world();
    let helper_sym = world.symbols.intern("helper");
    let replacement = world
        .new_method(Executable::bytecode(helper_sym, vec![9], Vec::new()))
        .unwrap();
    world
        .attach_method(helper_sym, replacement, &StaticScope::top(animal), Visibility::Public)
        .unwrap();

    // The caller inlined the old body, so its code is gone and nothing
    // marks the holder any more
    assert_eq!(world.heap.executable(speak).unwrap().jit, None);
    assert!(!world.code_cache.contains(id));
    assert!(world.heap.executable(helper).unwrap().inliners.is_empty());

    let stats = state.collect_garbage();
    assert_eq!(stats.code_resources_cleaned, 1);
    assert!(!state.world().code.contains(id));
}
