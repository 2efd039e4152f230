//! EventLoop 单元测试
//!
//! 测试操作标识、运行顺序、生命周期钩子与失败处理


use crate::error::Error;
use crate::process;
use crate::runtime::hooks::{self, AsyncHook};
use crate::runtime::scheduler::{EventLoop, LoopConfig, OpId, OpKind, OpState};
use std::cell::RefCell;
use std::rc::Rc;

/// Collects the loop's lifecycle notifications as strings.
#[derive(Default)]
struct Lifecycle {
    events: RefCell<Vec<String>>,
}

impl AsyncHook for Lifecycle {
    fn init(
        &self,
        op: OpId,
        kind: OpKind,
        trigger: OpId,
    ) {
        self.events
            .borrow_mut()
            .push(format!("init {} {} <- {}", op.0, kind, trigger.0));
    }

    fn before(
        &self,
        op: OpId,
    ) {
        self.events.borrow_mut().push(format!("before {}", op.0));
    }

    fn after(
        &self,
        op: OpId,
    ) {
        self.events.borrow_mut().push(format!("after {}", op.0));
    }

    fn destroy(
        &self,
        op: OpId,
    ) {
        self.events.borrow_mut().push(format!("destroy {}", op.0));
    }
}

fn log() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

#[cfg(test)]
mod op_id_tests {
    use super::*;

    #[test]
    fn test_op_id_unique() {
        let a = OpId::next();
        let b = OpId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_op_id_root() {
        assert!(OpId::ROOT.is_root());
        assert!(!OpId::next().is_root());
    }

    #[test]
    fn test_op_id_display() {
        assert_eq!(format!("{}", OpId(42)), "Op(42)");
    }
}

#[cfg(test)]
mod loop_config_tests {
    use super::*;

    #[test]
    fn test_loop_config_default() {
        let config = LoopConfig::default();
        assert_eq!(config.max_turns, None);
        assert_eq!(config.timer_resolution_ms, 1);
    }

    #[test]
    fn test_loop_with_config() {
        let event_loop = EventLoop::with_config(LoopConfig {
            max_turns: Some(3),
            timer_resolution_ms: 5,
        });
        assert_eq!(event_loop.config().max_turns, Some(3));
        let _ = format!("{:?}", event_loop);
    }
}

#[cfg(test)]
mod ordering_tests {
    use super::*;

    #[test]
    fn test_immediates_run_in_order() {
        let event_loop = EventLoop::new();
        let seen = log();
        for i in 0..3 {
            let seen = seen.clone();
            event_loop.set_immediate(move || {
                seen.borrow_mut().push(format!("immediate {i}"));
                Ok(())
            });
        }
        let stats = event_loop.run().unwrap();
        assert_eq!(
            *seen.borrow(),
            vec!["immediate 0", "immediate 1", "immediate 2"]
        );
        assert_eq!(stats.created, 3);
        assert_eq!(stats.invoked, 3);
        assert_eq!(stats.destroyed, 3);
        assert_eq!(event_loop.pending(), 0);
    }

    #[test]
    fn test_microtasks_before_immediates() {
        let event_loop = EventLoop::new();
        let seen = log();
        let s = seen.clone();
        event_loop.set_immediate(move || {
            s.borrow_mut().push("immediate".to_string());
            Ok(())
        });
        let s = seen.clone();
        event_loop.queue_microtask(move || {
            s.borrow_mut().push("microtask".to_string());
            Ok(())
        });
        event_loop.run().unwrap();
        assert_eq!(*seen.borrow(), vec!["microtask", "immediate"]);
    }

    #[test]
    fn test_timers_fire_by_deadline() {
        let event_loop = EventLoop::new();
        let seen = log();
        for delay in [30u64, 10, 20] {
            let seen = seen.clone();
            let handle = event_loop.clone();
            event_loop.set_timeout(delay, move || {
                seen.borrow_mut().push(format!("{delay}@{}", handle.now()));
                Ok(())
            });
        }
        event_loop.run().unwrap();
        assert_eq!(*seen.borrow(), vec!["10@10", "20@20", "30@30"]);
        assert_eq!(event_loop.now(), 30);
    }

    #[test]
    fn test_zero_delay_uses_resolution() {
        let event_loop = EventLoop::new();
        event_loop.set_timeout(0, || Ok(()));
        event_loop.run().unwrap();
        assert_eq!(event_loop.now(), 1);
    }

    #[test]
    fn test_interval_until_cleared() {
        let event_loop = EventLoop::new();
        let count = Rc::new(RefCell::new(0));
        let handle = event_loop.clone();
        let ticks = count.clone();
        let id = Rc::new(RefCell::new(None));
        let own_id = id.clone();
        let op = event_loop.set_interval(5, move || {
            *ticks.borrow_mut() += 1;
            if *ticks.borrow() == 3 {
                let op = own_id.borrow().expect("interval id");
                assert!(handle.clear(op));
                assert_eq!(handle.state(op), Some(OpState::Active));
            }
            Ok(())
        });
        *id.borrow_mut() = Some(op);

        let stats = event_loop.run().unwrap();
        assert_eq!(*count.borrow(), 3);
        assert_eq!(event_loop.now(), 15);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(event_loop.state(op), None);
    }

    #[test]
    fn test_clear_before_run() {
        let event_loop = EventLoop::new();
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let op = event_loop.set_timeout(10, move || {
            *flag.borrow_mut() = true;
            Ok(())
        });
        assert_eq!(event_loop.state(op), Some(OpState::Created));
        assert!(event_loop.clear(op));
        assert!(!event_loop.clear(op));
        let stats = event_loop.run().unwrap();
        assert!(!*ran.borrow());
        assert_eq!(stats.invoked, 0);
        assert_eq!(stats.destroyed, 1);
    }

    #[test]
    fn test_max_turns_stops_runaway_interval() {
        let event_loop = EventLoop::with_config(LoopConfig {
            max_turns: Some(4),
            timer_resolution_ms: 1,
        });
        event_loop.set_interval(1, || Ok(()));
        let stats = event_loop.run().unwrap();
        assert_eq!(stats.invoked, 4);
        assert_eq!(event_loop.pending(), 1);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_hooks_bracket_each_invocation() {
        let lifecycle = Rc::new(Lifecycle::default());
        let handle = hooks::create_hook(lifecycle.clone());
        handle.enable();

        let event_loop = EventLoop::new();
        let inner_loop = event_loop.clone();
        let inner_id = Rc::new(RefCell::new(None));
        let sink = inner_id.clone();
        let outer = event_loop.set_immediate(move || {
            *sink.borrow_mut() = Some(inner_loop.set_immediate(|| Ok(())).0);
            Ok(())
        });
        event_loop.run().unwrap();
        handle.disable();

        let inner = inner_id.borrow().expect("inner op");
        let expected = vec![
            format!("init {} Immediate <- 0", outer.0),
            format!("before {}", outer.0),
            format!("init {} Immediate <- {}", inner, outer.0),
            format!("after {}", outer.0),
            format!("destroy {}", outer.0),
            format!("before {}", inner),
            format!("after {}", inner),
            format!("destroy {}", inner),
        ];
        assert_eq!(*lifecycle.events.borrow(), expected);
    }

    #[test]
    fn test_execution_id_inside_callback() {
        let event_loop = EventLoop::new();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let op = event_loop.set_immediate(move || {
            *sink.borrow_mut() = Some(hooks::execution_async_id());
            Ok(())
        });
        event_loop.run().unwrap();
        assert_eq!(*seen.borrow(), Some(op));
        assert_eq!(hooks::execution_async_id(), OpId::ROOT);
    }

    #[test]
    fn test_dropping_loop_destroys_pending() {
        let lifecycle = Rc::new(Lifecycle::default());
        let handle = hooks::create_hook(lifecycle.clone());
        handle.enable();
        let op = {
            let event_loop = EventLoop::new();
            event_loop.set_timeout(100, || Ok(()))
        };
        handle.disable();
        assert!(lifecycle
            .events
            .borrow()
            .contains(&format!("destroy {}", op.0)));
    }

    #[test]
    fn test_spawned_future_polled_per_wake() {
        let lifecycle = Rc::new(Lifecycle::default());
        let handle = hooks::create_hook(lifecycle.clone());
        handle.enable();

        let event_loop = EventLoop::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let got = Rc::new(RefCell::new(None));
        let sink = got.clone();
        let task = event_loop.spawn(async move {
            *sink.borrow_mut() = Some(rx.await?);
            Ok(())
        });
        event_loop.set_timeout(5, move || {
            let _ = tx.send(7);
            Ok(())
        });
        let stats = event_loop.run().unwrap();
        handle.disable();

        assert_eq!(*got.borrow(), Some(7));
        assert_eq!(stats.invoked, 3);
        let befores = lifecycle
            .events
            .borrow()
            .iter()
            .filter(|e| **e == format!("before {}", task.0))
            .count();
        assert_eq!(befores, 2);
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[test]
    fn test_unhandled_failure_stops_loop() {
        let event_loop = EventLoop::new();
        let ran_after = Rc::new(RefCell::new(false));
        event_loop.set_immediate(|| anyhow::bail!("kaboom"));
        let flag = ran_after.clone();
        event_loop.set_immediate(move || {
            *flag.borrow_mut() = true;
            Ok(())
        });

        let err = event_loop.run().unwrap_err();
        match err {
            Error::Uncaught(fault) => assert_eq!(fault.to_string(), "kaboom"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!*ran_after.borrow());
        assert_eq!(event_loop.stats().faults_fatal, 1);
        assert!(!event_loop.is_running());
    }

    #[test]
    fn test_handled_failure_continues() {
        let handler = process::on_uncaught(|_| Ok(()));
        let event_loop = EventLoop::new();
        event_loop.set_immediate(|| anyhow::bail!("first"));
        event_loop.set_immediate(|| Ok(()));
        let stats = event_loop.run().unwrap();
        process::remove_uncaught(handler);

        assert_eq!(stats.faults_handled, 1);
        assert_eq!(stats.invoked, 2);
    }

    #[test]
    fn test_panic_becomes_failure() {
        let event_loop = EventLoop::new();
        event_loop.set_immediate(|| panic!("oops"));
        let err = event_loop.run().unwrap_err();
        let fault = err.fault().expect("fault");
        assert!(fault.to_string().contains("oops"));
    }

    #[test]
    fn test_failure_escapes_inside_window() {
        let lifecycle = Rc::new(Lifecycle::default());
        let handle = hooks::create_hook(lifecycle.clone());
        handle.enable();
        let seen = lifecycle.clone();
        let handler = process::on_uncaught(move |_| {
            seen.events.borrow_mut().push("escape".to_string());
            Ok(())
        });

        let event_loop = EventLoop::new();
        let op = event_loop.set_immediate(|| anyhow::bail!("inside"));
        event_loop.run().unwrap();
        handle.disable();
        process::remove_uncaught(handler);

        let events = lifecycle.events.borrow();
        let before = events.iter().position(|e| *e == format!("before {}", op.0));
        let escape = events.iter().position(|e| e == "escape");
        let after = events.iter().position(|e| *e == format!("after {}", op.0));
        assert!(before < escape && escape < after);
    }

    #[test]
    fn test_panicking_handler_still_closes_window() {
        let lifecycle = Rc::new(Lifecycle::default());
        let handle = hooks::create_hook(lifecycle.clone());
        handle.enable();
        let handler = process::on_uncaught(|_| panic!("handler bug"));

        let event_loop = EventLoop::new();
        let op = event_loop.set_immediate(|| anyhow::bail!("inside"));
        let err = event_loop.run().unwrap_err();
        process::remove_uncaught(handler);
        handle.disable();

        let fault = err.fault().expect("fault");
        assert!(fault.to_string().contains("handler bug"));
        assert_eq!(event_loop.stats().faults_fatal, 1);
        assert_eq!(event_loop.pending(), 0);
        assert_eq!(hooks::execution_async_id(), OpId::ROOT);

        let events = lifecycle.events.borrow();
        assert!(events.contains(&format!("after {}", op.0)));
        assert!(events.contains(&format!("destroy {}", op.0)));
    }

    #[test]
    fn test_reentrant_run_rejected() {
        let event_loop = EventLoop::new();
        let handle = event_loop.clone();
        let result = Rc::new(RefCell::new(None));
        let sink = result.clone();
        event_loop.set_immediate(move || {
            *sink.borrow_mut() = Some(matches!(handle.run(), Err(Error::LoopReentered)));
            Ok(())
        });
        event_loop.run().unwrap();
        assert_eq!(*result.borrow(), Some(true));
    }
}
