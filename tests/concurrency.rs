use std::sync::Arc;
use std::thread;

use confreg::{ItemDef, Registry, Scalar, Values, callback};

fn shared() -> Arc<Registry> {
    let mut registry = Registry::new();
    let uniform = callback(|inv| {
        let changes = inv.changes.ok_or("no change set")?;
        let first = changes.changes.first().map(|c| c.new.clone());
        if changes.changes.iter().all(|c| Some(c.new.clone()) == first) {
            Ok(())
        } else {
            Err("mixed values within one assignment".into())
        }
    });
    registry
        .register(
            vec![
                ItemDef::new("Vector", "Integer", 64).callback(uniform),
                ItemDef::new("Level", "Long", 1),
            ],
            Some("A"),
        )
        .unwrap();
    registry
        .register(vec![ItemDef::new("Level", "Long", 1)], Some("B"))
        .unwrap();
    registry.finalize(None).unwrap();
    Arc::new(registry)
}

#[test]
fn whole_item_assignments_do_not_interleave() {
    let registry = shared();
    let workers: Vec<_> = (1..=4)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..200 {
                    registry
                        .apply_text(&format!("Vector all: {}", t))
                        .expect("uniform assignment");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    let Values::I32(values) = registry.values("Vector").unwrap() else {
        panic!("Vector holds integers");
    };
    assert!((1..=4).contains(&values[0]));
    assert!(values.iter().all(|&v| v == values[0]));
}

#[test]
fn sessions_keep_their_own_default_section() {
    let registry = shared();
    let workers: Vec<_> = ["A", "B"]
        .into_iter()
        .map(|section| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut session = registry.session();
                session.apply_text(&format!("[{}]:", section)).unwrap();
                for i in 0..100 {
                    session.apply_text(&format!("Level {}", i)).unwrap();
                    assert_eq!(session.default_section(), Some(section));
                }
                let value = if section == "A" { 1000 } else { 2000 };
                session.apply_text(&format!("Level {}", value)).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(registry.values("A:Level").unwrap(), Values::I64(vec![1000]));
    assert_eq!(registry.values("B:Level").unwrap(), Values::I64(vec![2000]));
    assert_eq!(
        registry.find("A:Level").unwrap().values().unwrap().scalar(0),
        Some(Scalar::Int(1000))
    );
}
