use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use callbridge_runtime::serde_json::{Value, json};
use callbridge_runtime::{
    BridgeConfig, BridgeError, CallKind, ChannelTransport, Driver, Element, HandlerError,
    PumpHost, codec,
};

struct Button {
    clicks: AtomicUsize,
}

impl Element for Button {
    fn call(&self, method: &str, _payload: Value) -> Result<Value, HandlerError> {
        match method {
            "Click" => Ok(json!(self.clicks.fetch_add(1, Ordering::SeqCst) + 1)),
            other => Err(HandlerError::unknown_method(other)),
        }
    }
}

fn driver_with_capacity(capacity: usize) -> (Driver, mpsc::Receiver<String>) {
    let (transport, native_rx) = ChannelTransport::bounded(64);
    let config = BridgeConfig::default().with_ui_queue_capacity(capacity);
    (Driver::new(config, Arc::new(transport)), native_rx)
}

#[test]
fn ui_tasks_run_in_submission_order_under_backpressure() {
    let (driver, _native_rx) = driver_with_capacity(256);
    driver.run(PumpHost::Dedicated).unwrap();

    // Hold the pump so the queue fills past capacity.
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    driver
        .dispatch_to_ui(move || {
            let _ = gate_rx.recv();
        })
        .unwrap();

    let executed = Arc::new(Mutex::new(Vec::new()));
    let start = Arc::new(Barrier::new(10));

    let submitters: Vec<_> = (0..10)
        .map(|thread_idx| {
            let driver = driver.clone();
            let executed = executed.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for task_idx in 0..30 {
                    let executed = executed.clone();
                    driver
                        .dispatch_to_ui(move || executed.lock().unwrap().push((thread_idx, task_idx)))
                        .expect("blocking submit never drops");
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    gate_tx.send(()).unwrap();

    for submitter in submitters {
        submitter.join().unwrap();
    }

    let (done_tx, done_rx) = mpsc::channel();
    driver.dispatch_to_ui(move || done_tx.send(()).unwrap()).unwrap();
    done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    driver.shutdown();

    let executed = executed.lock().unwrap().clone();
    assert_eq!(executed.len(), 300);

    // Each submitter's sends complete in program order, so its tasks must too.
    for thread_idx in 0..10 {
        let mine: Vec<_> = executed
            .iter()
            .filter(|(t, _)| *t == thread_idx)
            .map(|(_, task)| *task)
            .collect();
        assert_eq!(mine, (0..30).collect::<Vec<_>>());
    }
}

#[test]
fn shutdown_racing_submitters_never_loses_accepted_work() {
    for _ in 0..50 {
        let (driver, _native_rx) = driver_with_capacity(8);
        driver.run(PumpHost::Dedicated).unwrap();

        let accepted = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(5));

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let driver = driver.clone();
                let accepted = accepted.clone();
                let ran = ran.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    loop {
                        let ran = ran.clone();
                        match driver.dispatch_to_ui(move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                        }) {
                            Ok(()) => accepted.fetch_add(1, Ordering::SeqCst),
                            Err(BridgeError::QueueClosed) => break,
                            Err(other) => panic!("unexpected dispatch error: {other}"),
                        };
                    }
                })
            })
            .collect();

        start.wait();
        thread::sleep(Duration::from_millis(1));
        driver.shutdown();

        for submitter in submitters {
            submitter.join().unwrap();
        }

        assert_eq!(ran.load(Ordering::SeqCst), accepted.load(Ordering::SeqCst));
    }
}

#[test]
fn synchronous_invoke_is_resolved_exactly_once_from_another_thread() {
    let (driver, native_rx) = driver_with_capacity(16);
    driver.run(PumpHost::Dedicated).unwrap();

    let native = {
        let driver = driver.clone();
        thread::spawn(move || {
            let call = codec::decode(&native_rx.recv().unwrap()).unwrap();
            assert_eq!(call.selector, "Window.Close");
            let id = call.correlation.unwrap();

            driver.resolve(&id, Ok(json!("ok"))).unwrap();
            driver.resolve(&id, Ok(json!("again")))
        })
    };

    assert_eq!(driver.invoke("Window.Close", Value::Null).unwrap(), json!("ok"));
    assert!(matches!(
        native.join().unwrap(),
        Err(BridgeError::UnknownCorrelation(_))
    ));
    assert_eq!(driver.pending_calls(), 0);
    driver.shutdown();
}

#[test]
fn out_of_order_resolutions_reach_their_own_callers() {
    let (driver, native_rx) = driver_with_capacity(16);

    let callers: Vec<_> = (0..8)
        .map(|i| {
            let driver = driver.clone();
            thread::spawn(move || driver.invoke("Echo.Value", json!(i)).unwrap())
        })
        .collect();

    let mut calls: Vec<_> = (0..8)
        .map(|_| codec::decode(&native_rx.recv().unwrap()).unwrap())
        .collect();
    calls.reverse();
    for call in calls {
        driver
            .resolve(&call.correlation.unwrap(), Ok(call.payload.clone()))
            .unwrap();
    }

    let mut results: Vec<i64> = callers
        .into_iter()
        .map(|caller| caller.join().unwrap().as_i64().unwrap())
        .collect();
    results.sort_unstable();
    assert_eq!(results, (0..8).collect::<Vec<_>>());
}

#[test]
fn inbound_call_for_unregistered_element_runs_nothing() {
    let (driver, _native_rx) = driver_with_capacity(16);
    driver.run(PumpHost::Dedicated).unwrap();
    let button = Arc::new(Button {
        clicks: AtomicUsize::new(0),
    });
    let registered = driver.registry().create_named("menu", &button).unwrap();
    assert_ne!(registered, "btn-1");

    let raw = codec::encode("btn-1.Click", &Value::Null, None);
    for kind in [CallKind::Inline, CallKind::UiAffine] {
        assert!(matches!(
            driver.handle_inbound(&raw, kind),
            Err(BridgeError::ElementNotFound(_))
        ));
    }

    driver.shutdown();
    assert_eq!(button.clicks.load(Ordering::SeqCst), 0);
}

#[test]
fn ui_affine_clicks_run_on_the_ui_thread() {
    let (driver, _native_rx) = driver_with_capacity(16);
    driver.run(PumpHost::Dedicated).unwrap();

    let seen_on_ui = Arc::new(Mutex::new(Vec::new()));
    let probe = {
        let driver = driver.clone();
        let seen_on_ui = seen_on_ui.clone();
        Arc::new(move |_: &str, _: Value| -> Result<Value, HandlerError> {
            seen_on_ui.lock().unwrap().push(driver.is_ui_thread());
            Ok(Value::Null)
        })
    };
    let id = driver.registry().create_named("btn", &probe).unwrap();

    let raw = codec::encode(&format!("{id}.Click"), &Value::Null, None);
    for _ in 0..5 {
        assert_eq!(driver.handle_inbound(&raw, CallKind::UiAffine).unwrap(), None);
    }
    driver.handle_inbound(&raw, CallKind::Inline).unwrap();

    driver.shutdown();

    // Five deferred runs on the pump, one inline run on this thread.
    let mut flags = seen_on_ui.lock().unwrap().clone();
    flags.sort_unstable();
    assert_eq!(flags, vec![false, true, true, true, true, true]);
}

#[test]
fn registry_never_serves_deleted_ids_under_contention() {
    let (driver, _native_rx) = driver_with_capacity(16);
    let owner = Arc::new(Button {
        clicks: AtomicUsize::new(0),
    });
    let deleted = Arc::new(Mutex::new(Vec::<String>::new()));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let driver = driver.clone();
            let owner = owner.clone();
            let deleted = deleted.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    let id = driver.registry().create(&owner);
                    driver.registry().delete(&id).unwrap();
                    deleted.lock().unwrap().push(id);
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let driver = driver.clone();
            let deleted = deleted.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let snapshot = deleted.lock().unwrap().clone();
                    for id in snapshot {
                        assert!(matches!(
                            driver.registry().lookup(&id),
                            Err(BridgeError::NotFound(_))
                        ));
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
    assert_eq!(deleted.lock().unwrap().len(), 1000);
    assert!(driver.registry().is_empty());
}
