#![cfg(unix)]

use garnet_engine::jit::CompilerState;
use garnet_engine::vm::process::{exec, fork, wait_pid, WaitStatus};
use garnet_engine::vm::{LockStatus, SharedState, State, VmOptions};
use parking_lot::Mutex;
use std::time::Duration;

// Children of one test must not be reaped by another
static FORK_LOCK: Mutex<()> = Mutex::new(());

fn new_state(background: bool) -> State {
    let _ = env_logger::builder().is_test(true).try_init();
    State::new(SharedState::new(VmOptions {
        jit_background: background,
        ..VmOptions::default()
    }))
    .unwrap()
}

/// Leave the child without running destructors or test harness code
fn child_exit(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

fn wait_for(state: &mut State, pid: i32) -> Option<i32> {
    match wait_pid(state, pid, false).unwrap() {
        WaitStatus::Exited { pid: reaped, code } => {
            assert_eq!(reaped, pid);
            code
        }
        other => panic!("unexpected wait status {:?}", other),
    }
}

// ============================================================================
// Fork
// ============================================================================

#[test]
fn test_fork_reinitializes_lock_and_pauses_compiler() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(true);
    assert_eq!(state.shared().compiler().state(), CompilerState::Running);

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        let shared = state.shared().clone();
        let ok = state.holds_lock()
            && shared.lock().owner() == Some(state.unit())
            && shared.compiler().state() == CompilerState::Paused
            && !shared.compiler().has_thread();
        if !ok {
            child_exit(1);
        }
        // Restartable after the fork
        let restarted = shared.compiler().unpause().is_ok()
            && shared.compiler().state() == CompilerState::Running;
        child_exit(if restarted { 0 } else { 2 });
    }

    assert!(pid > 0);
    assert!(state.holds_lock());
    assert_eq!(state.shared().lock().owner(), Some(state.unit()));
    assert_eq!(state.shared().compiler().state(), CompilerState::Running);
    assert_eq!(wait_for(&mut state, pid), Some(0));
}

#[test]
fn test_fork_keeps_paused_compiler_paused() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(true);
    state.shared().compiler().pause();
    assert_eq!(state.shared().compiler().state(), CompilerState::Paused);

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        let paused = state.shared().compiler().state() == CompilerState::Paused;
        child_exit(if paused && state.holds_lock() { 0 } else { 1 });
    }

    assert_eq!(state.shared().compiler().state(), CompilerState::Paused);
    assert!(state.shared().compiler().has_thread());
    assert_eq!(wait_for(&mut state, pid), Some(0));

    state.shared().compiler().unpause().unwrap();
    assert_eq!(state.shared().compiler().state(), CompilerState::Running);
}

#[test]
fn test_child_can_use_the_world() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(false);
    let name = state.world().symbols.intern("Animal");

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        let created = state.world().open_class(name, None, None).is_ok();
        child_exit(if created { 0 } else { 1 });
    }

    assert_eq!(wait_for(&mut state, pid), Some(0));
    // The child's class never reaches the parent
    let object = state.world().model.object;
    assert!(state.world().model.get(object).constant(name).is_none());
}

// ============================================================================
// Wait
// ============================================================================

#[test]
fn test_wait_no_hang_before_child_exits() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(false);

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        std::thread::sleep(Duration::from_millis(300));
        child_exit(3);
    }

    assert_eq!(wait_pid(&mut state, pid, true).unwrap(), WaitStatus::NoStatusYet);
    assert!(state.holds_lock());
    assert_eq!(wait_for(&mut state, pid), Some(3));
}

#[test]
fn test_wait_without_children() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(false);
    assert_eq!(wait_pid(&mut state, -1, false).unwrap(), WaitStatus::NoChild);
    assert_eq!(wait_pid(&mut state, -1, true).unwrap(), WaitStatus::NoChild);
    assert!(state.holds_lock());
}

#[test]
fn test_signaled_child_has_no_exit_code() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(false);

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        unsafe {
            libc::signal(libc::SIGTERM, libc::SIG_DFL);
            libc::raise(libc::SIGTERM);
        }
        child_exit(0);
    }
    assert_eq!(wait_for(&mut state, pid), None);
}

#[test]
fn test_wait_releases_lock_for_other_units() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(false);
    let shared = state.shared().clone();

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        std::thread::sleep(Duration::from_millis(300));
        child_exit(0);
    }

    // Another unit takes the lock while this one is blocked in waitpid
    let other = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        let mut unit = State::new(shared).unwrap();
        unit.world().symbols.intern("ran");
        unit.holds_lock()
    });

    assert_eq!(wait_for(&mut state, pid), Some(0));
    assert!(other.join().unwrap());
    assert!(state.holds_lock());
}

// ============================================================================
// Exec and Signals
// ============================================================================

#[test]
fn test_exec_replaces_child_image() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(true);

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        let _ = exec(&mut state, "sh", &["-c", "exit 7"]);
        child_exit(100);
    }
    assert_eq!(wait_for(&mut state, pid), Some(7));
}

#[test]
fn test_failed_exec_restarts_compiler() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(true);

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        state.shared().compiler().unpause().ok();
        let failed = exec(&mut state, "/nonexistent/garnet-test-binary", &[]).is_err();
        let compiler = state.shared().compiler();
        let running = compiler.state() == CompilerState::Running && compiler.has_thread();
        child_exit(if failed && running { 0 } else { 1 });
    }
    assert_eq!(wait_for(&mut state, pid), Some(0));
}

#[test]
fn test_watched_signal_is_recorded() {
    let state = new_state(false);
    assert!(state.watch_signal(libc::SIGUSR2));
    assert!(state.shared().signals().is_watched(libc::SIGUSR2));
    assert!(!state.watch_signal(libc::SIGKILL));

    unsafe {
        libc::raise(libc::SIGUSR2);
    }
    assert!(state.take_pending_signals().contains(&libc::SIGUSR2));
    assert!(!state.take_pending_signals().contains(&libc::SIGUSR2));
}

#[test]
fn test_child_resets_signal_dispositions() {
    let _guard = FORK_LOCK.lock();
    let mut state = new_state(false);
    assert!(state.watch_signal(libc::SIGUSR1));

    let pid = fork(&mut state).unwrap();
    if pid == 0 {
        state.shared().signals().reset_signal_dispositions();
        let restored = unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            libc::sigaction(libc::SIGUSR1, std::ptr::null(), &mut current);
            current.sa_sigaction == libc::SIG_DFL
        };
        let cleared = !state.shared().signals().is_watched(libc::SIGUSR1);
        child_exit(if restored && cleared { 0 } else { 1 });
    }
    assert_eq!(wait_for(&mut state, pid), Some(0));
    assert!(state.shared().signals().is_watched(libc::SIGUSR1));
}

// ============================================================================
// Global Lock
// ============================================================================

#[test]
fn test_without_lock_lets_another_unit_run() {
    let mut state = new_state(false);
    let shared = state.shared().clone();
    let me = state.unit();

    let ran = state.without_lock(|| {
        assert!(!shared.lock().is_locked());
        let shared = shared.clone();
        std::thread::spawn(move || {
            let unit = State::new(shared.clone()).unwrap();
            let other = unit.unit();
            (shared.lock().owner() == Some(other), other)
        })
        .join()
        .unwrap()
    });

    assert!(ran.0);
    assert_ne!(ran.1, me);
    assert!(state.holds_lock());
    assert_eq!(shared.lock().owner(), Some(me));
    assert_eq!(shared.lock().unlock(ran.1), LockStatus::NotOwner);
}
