#![no_main]

use std::cell::RefCell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sigquery_reactive::{HostConfig, HostContext, Observable, RaisedError};

#[derive(Debug, Arbitrary)]
enum Op {
    Post { port: bool, value: u8 },
    Advance { port: bool },
    Close { port: bool },
    Tick,
}

fuzz_target!(|ops: Vec<Op>| {
    let ctx = HostContext::new(
        HostConfig::default()
            .with_backlog_warning(32)
            .with_max_messages_per_tick(8),
    );
    let cell = Observable::new(0u8);
    let applied = Rc::new(RefCell::new(0usize));

    let open = |label: &'static str| {
        let (cell, applied) = (cell.clone(), Rc::clone(&applied));
        ctx.open_port(label, move |value: u8| {
            *applied.borrow_mut() += 1;
            if value == u8::MAX {
                return Err(RaisedError::new(label, value));
            }
            cell.set(value);
            Ok(())
        })
    };
    let ports = [open("left"), open("right")];
    let mut senders = [ports[0].sender(), ports[1].sender()];
    let mut raised = 0usize;

    for op in ops {
        match op {
            Op::Post { port, value } => {
                let _ = senders[usize::from(port)].post(value);
            }
            Op::Advance { port } => {
                let i = usize::from(port);
                senders[i] = ports[i].advance();
            }
            Op::Close { port } => ports[usize::from(port)].close(),
            Op::Tick => {
                let report = ctx.tick();
                assert!(report.received <= 8);
                assert_eq!(
                    report.received,
                    report.applied + report.stale + report.raised.len()
                );
                raised += report.raised.len();
            }
        }
    }

    let rest = ctx.drain();
    raised += rest.raised.len();
    assert!(raised <= *applied.borrow());
});
