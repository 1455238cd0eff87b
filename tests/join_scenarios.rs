mod common;

use std::sync::Arc;

use futures_util::FutureExt;
use kproc::process::yield_now;
use kproc::{
    ExecError, JoinError, KernelConfig, ProcessId, ProcessService, ProcessState, Program,
    ProgramRegistry,
};

use common::{join_simple, loop_simple, service_with, Console, Slot};

#[test]
fn join_simple_reports_child_status_then_continues() {
    let console = Console::default();
    let registry = ProgramRegistry::new(64);
    registry.install("joinSimple.coff", join_simple(console.clone()));
    registry.install("loopSimple.coff", loop_simple(5, 9));
    let service = service_with(registry);

    let root = service.boot("joinSimple.coff", &["joinSimple.coff"]).unwrap();
    service.run();

    let lines = console.lines();
    assert_eq!(lines[0], format!("Child pid={}, exit status: 9", root.as_u64() + 1));
    assert_eq!(lines.len(), 15);
    assert_eq!(lines.last().map(String::as_str), Some("c=15"));
    assert!(service.is_halted());
    assert_eq!(service.get_process_count(), 0);
}

#[test]
fn join_after_child_exit_returns_at_once_and_orphan_is_reaped() {
    let b_pid = Slot::<ProcessId>::default();
    let c_pid = Slot::<ProcessId>::default();
    let joined = Slot::<Option<Result<i32, JoinError>>>::default();
    let c_parent_after_b_exit = Slot::<Option<ProcessId>>::default();

    let registry = ProgramRegistry::new(64);
    registry.install(
        "c.coff",
        Program::new(2, |ctx| async move {
            ctx.sleep(10_000).await;
            0
        }),
    );
    {
        let c_pid = c_pid.clone();
        registry.install(
            "b.coff",
            Program::new(2, move |ctx| {
                let c_pid = c_pid.clone();
                async move {
                    c_pid.set(ctx.exec("c.coff", &[]).unwrap());
                    7
                }
            }),
        );
    }
    {
        let (b_pid, c_pid, joined, c_parent) = (
            b_pid.clone(),
            c_pid.clone(),
            joined.clone(),
            c_parent_after_b_exit.clone(),
        );
        registry.install(
            "a.coff",
            Program::new(2, move |ctx| {
                let (b_pid, c_pid, joined, c_parent) =
                    (b_pid.clone(), c_pid.clone(), joined.clone(), c_parent.clone());
                async move {
                    let b = ctx.exec("b.coff", &[]).unwrap();
                    b_pid.set(b);
                    while ctx.service().lookup(b).map(|pcb| pcb.state()) != Some(ProcessState::Zombie) {
                        yield_now().await;
                    }
                    // B is a Zombie: the join must resolve on its first poll.
                    joined.set(ctx.join(b).now_or_never());
                    let c = c_pid.get().unwrap();
                    c_parent.set(ctx.service().lookup(c).and_then(|pcb| pcb.parent()));
                    0
                }
            }),
        );
    }

    let service = service_with(registry);
    service.boot("a.coff", &[]).unwrap();
    service.run();

    assert_eq!(joined.get(), Some(Some(Ok(7))));
    assert_eq!(c_parent_after_b_exit.get(), Some(None));
    let (b, c) = (b_pid.get().unwrap(), c_pid.get().unwrap());
    assert!(service.lookup(b).is_none());
    assert!(service.lookup(c).is_none());
    assert_eq!(service.get_process_count(), 0);
}

#[test]
fn join_blocks_until_child_exits() {
    let parent_state_seen_by_child = Slot::<ProcessState>::default();
    let joined = Slot::<Result<i32, JoinError>>::default();

    let registry = ProgramRegistry::new(64);
    {
        let seen = parent_state_seen_by_child.clone();
        registry.install(
            "b.coff",
            Program::new(2, move |ctx| {
                let seen = seen.clone();
                async move {
                    for _ in 0..3 {
                        yield_now().await;
                    }
                    let parent = ctx.parent().unwrap();
                    seen.set(ctx.service().lookup(parent).unwrap().state());
                    -1
                }
            }),
        );
    }
    {
        let joined = joined.clone();
        registry.install(
            "a.coff",
            Program::new(2, move |ctx| {
                let joined = joined.clone();
                async move {
                    let b = ctx.exec("b.coff", &[]).unwrap();
                    joined.set(ctx.join(b).await);
                    0
                }
            }),
        );
    }

    let service = service_with(registry);
    service.boot("a.coff", &[]).unwrap();
    service.run();

    assert_eq!(parent_state_seen_by_child.get(), Some(ProcessState::Blocked));
    assert_eq!(joined.get(), Some(Ok(-1)));
}

#[test]
fn second_join_on_same_child_is_already_joined() {
    let results = Slot::<Vec<(ProcessId, Result<i32, JoinError>)>>::default();
    let registry = ProgramRegistry::new(64);
    registry.install("b.coff", loop_simple(2, 3));
    {
        let results = results.clone();
        registry.install(
            "a.coff",
            Program::new(2, move |ctx| {
                let results = results.clone();
                async move {
                    let first = ctx.exec("b.coff", &[]).unwrap();
                    let second = ctx.exec("b.coff", &[]).unwrap();
                    assert_eq!(second.as_u64(), first.as_u64() + 1);
                    let mut out = Vec::new();
                    out.push((first, ctx.join(first).await));
                    out.push((first, ctx.join(first).await));
                    out.push((second, ctx.join(second).await));
                    results.set(out);
                    0
                }
            }),
        );
    }

    let service = service_with(registry);
    service.boot("a.coff", &[]).unwrap();
    service.run();

    let results = results.get().unwrap();
    assert_eq!(results[0].1, Ok(3));
    assert_eq!(results[1].1, Err(JoinError::AlreadyJoined));
    assert_eq!(results[2].1, Ok(3));
}

#[test]
fn join_rejects_self_and_unrelated_processes() {
    let results = Slot::<Vec<Result<i32, JoinError>>>::default();
    let registry = ProgramRegistry::new(64);
    registry.install("sleeper.coff", Program::new(1, |ctx| async move {
        ctx.sleep(100).await;
        0
    }));
    {
        let results = results.clone();
        registry.install(
            "a.coff",
            Program::new(2, move |ctx| {
                let results = results.clone();
                async move {
                    let stranger = ctx.service().exec(None, "sleeper.coff", &[]).unwrap();
                    let out = vec![
                        ctx.join(ctx.pid()).await,
                        ctx.join(stranger).await,
                        ctx.join(ProcessId(9_999)).await,
                    ];
                    results.set(out);
                    0
                }
            }),
        );
    }

    let service = service_with(registry);
    service.boot("a.coff", &[]).unwrap();
    service.run();

    assert_eq!(results.get().unwrap(), vec![Err(JoinError::NotAChild); 3]);
}

#[test]
fn failed_exec_creates_nothing() {
    let outcome = Slot::<Vec<ExecError>>::default();
    let children_after = Slot::<usize>::default();
    let registry = ProgramRegistry::new(6);
    registry.install("big.coff", Program::new(100, |_ctx| async { 0 }));
    registry.install("empty.coff", Program::new(0, |_ctx| async { 0 }));
    {
        let (outcome, children_after) = (outcome.clone(), children_after.clone());
        registry.install(
            "a.coff",
            Program::new(4, move |ctx| {
                let (outcome, children_after) = (outcome.clone(), children_after.clone());
                async move {
                    let errors = ["missing.coff", "empty.coff", "big.coff"]
                        .iter()
                        .filter_map(|path| ctx.exec(path, &[]).err())
                        .collect();
                    outcome.set(errors);
                    children_after.set(ctx.pcb().lock().children.len());
                    0
                }
            }),
        );
    }

    let service = service_with(registry);
    let root = service.boot("a.coff", &[]).unwrap();
    service.run();

    assert_eq!(
        outcome.get().unwrap(),
        vec![ExecError::LoadFailed, ExecError::LoadFailed, ExecError::ResourceExhausted]
    );
    assert_eq!(children_after.get(), Some(0));
    assert!(service.lookup(ProcessId(root.as_u64() + 1)).is_none());
}

#[test]
fn full_table_refuses_exec_and_returns_frames() {
    let registry = Arc::new(ProgramRegistry::new(64));
    registry.install("idle.coff", Program::new(2, |ctx| async move {
        ctx.sleep(10).await;
        0
    }));
    let config = KernelConfig::default().with_max_processes(2);
    let service = ProcessService::new(config, registry.clone());

    let root = service.boot("idle.coff", &[]).unwrap();
    service.exec(Some(root), "idle.coff", &[]).unwrap();
    assert_eq!(registry.free_frames(), 60);
    assert_eq!(
        service.exec(Some(root), "idle.coff", &[]),
        Err(ExecError::ResourceExhausted)
    );
    assert_eq!(registry.free_frames(), 60);
    assert_eq!(service.lookup(root).unwrap().lock().children.len(), 1);

    service.run();
    assert_eq!(registry.free_frames(), 64);
}

#[test]
fn exec_from_exited_process_fails() {
    let registry = ProgramRegistry::new(64);
    registry.install("a.coff", loop_simple(1, 0));
    let service = service_with(registry);
    let root = service.boot("a.coff", &[]).unwrap();
    service.run();
    assert_eq!(
        service.exec(Some(root), "a.coff", &[]),
        Err(ExecError::CallerExited)
    );
}

#[test]
fn exit_status_is_write_once() {
    let joined = Slot::<Result<i32, JoinError>>::default();
    let registry = ProgramRegistry::new(64);
    registry.install("b.coff", Program::new(1, |ctx| async move {
        ctx.exit(4);
        ctx.exit(5);
        6
    }));
    {
        let joined = joined.clone();
        registry.install(
            "a.coff",
            Program::new(1, move |ctx| {
                let joined = joined.clone();
                async move {
                    let b = ctx.exec("b.coff", &[]).unwrap();
                    joined.set(ctx.join(b).await);
                    0
                }
            }),
        );
    }
    let service = service_with(registry);
    service.boot("a.coff", &[]).unwrap();
    service.run();
    assert_eq!(joined.get(), Some(Ok(4)));
}

#[test]
fn sleeping_processes_wake_in_deadline_order() {
    let console = Console::default();
    let registry = ProgramRegistry::new(64);
    for (path, ticks) in [("slow.coff", 3_000u64), ("fast.coff", 1_000u64)] {
        let console = console.clone();
        registry.install(
            path,
            Program::new(1, move |ctx| {
                let console = console.clone();
                async move {
                    ctx.sleep(ticks).await;
                    console.print(format!("{} woke at {}", ticks, ctx.service().alarm().now()));
                    0
                }
            }),
        );
    }
    registry.install("root.coff", Program::new(1, |ctx| async move {
        let slow = ctx.exec("slow.coff", &[]).unwrap();
        let fast = ctx.exec("fast.coff", &[]).unwrap();
        ctx.join(slow).await.unwrap() + ctx.join(fast).await.unwrap()
    }));

    let service = service_with(registry);
    service.boot("root.coff", &[]).unwrap();
    service.run();

    assert_eq!(
        console.lines(),
        vec!["1000 woke at 1000".to_string(), "3000 woke at 3000".to_string()]
    );
}

#[test]
fn process_list_tracks_states() {
    let registry = ProgramRegistry::new(64);
    registry.install("child.coff", loop_simple(0, 1));
    registry.install("root.coff", Program::new(1, |ctx| async move {
        let child = ctx.exec("child.coff", &[]).unwrap();
        while ctx.service().lookup(child).map(|pcb| pcb.state()) != Some(ProcessState::Zombie) {
            yield_now().await;
        }
        let stats = ctx.service().get_system_stats();
        assert_eq!(stats.total_processes, 2);
        assert_eq!(stats.zombie_processes, 1);
        assert_eq!(stats.running_processes, 1);
        ctx.join(child).await.unwrap()
    }));

    let service = service_with(registry);
    let root = service.boot("root.coff", &[]).unwrap();
    let listed = service.list_processes();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].pid, root);
    assert_eq!(listed[0].state, ProcessState::Runnable);

    service.run();
    assert!(service.list_processes().is_empty());
    assert!(service.get_system_stats().context_switches > 0);
}

#[test]
fn killing_a_parent_blocked_in_join_reaps_its_child() {
    let child_pid = Slot::<ProcessId>::default();
    let registry = ProgramRegistry::new(64);
    registry.install("sleeper.coff", Program::new(2, |ctx| async move {
        ctx.sleep(10_000).await;
        5
    }));
    {
        let child_pid = child_pid.clone();
        registry.install(
            "a.coff",
            Program::new(2, move |ctx| {
                let child_pid = child_pid.clone();
                async move {
                    let child = ctx.exec("sleeper.coff", &[]).unwrap();
                    child_pid.set(child);
                    ctx.join(child).await.unwrap_or(0)
                }
            }),
        );
    }

    let service = service_with(registry);
    let parent = service.boot("a.coff", &[]).unwrap();
    service.scheduler().run_until_idle();
    assert_eq!(service.lookup(parent).unwrap().state(), ProcessState::Blocked);
    let child = child_pid.get().unwrap();

    assert!(service.fault(parent));
    assert!(service.lookup(parent).is_none());
    assert_eq!(service.lookup(child).unwrap().parent(), None);
    assert_eq!(service.scheduler().task_count(), 1);

    service.run();
    assert!(service.lookup(child).is_none());
    assert_eq!(service.get_process_count(), 0);
    assert_eq!(service.scheduler().task_count(), 0);
    assert!(service.is_halted());
}
