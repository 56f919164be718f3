mod common;

use common::{transfer, Chain, STARTING_BALANCE, USERS};
use ledgerd::object_store::{Id, Object, ObjectDatabase, UndoSession};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    id: Id<Counter>,
    label: String,
    value: i64,
}

impl Object for Counter {
    const SPACE_ID: u8 = 7;
    const TYPE_ID: u8 = 3;
    const NAME: &'static str = "counter";
    type Key = String;

    fn id(&self) -> Id<Self> {
        self.id
    }

    fn set_id(&mut self, id: Id<Self>) {
        self.id = id;
    }

    fn key(&self) -> Option<String> {
        Some(self.label.clone())
    }
}

#[derive(Debug, Clone)]
enum Step {
    Create(u8, i64),
    Modify(u64, i64),
    Rename(u64, u8),
    Remove(u64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..16, any::<i64>()).prop_map(|(label, value)| Step::Create(label, value)),
        (0u64..32, any::<i64>()).prop_map(|(id, value)| Step::Modify(id, value)),
        (0u64..32, 0u8..16).prop_map(|(id, label)| Step::Rename(id, label)),
        (0u64..32).prop_map(Step::Remove),
    ]
}

/// Failed steps (duplicate labels, missing ids) are part of the workload.
fn run(db: &mut ObjectDatabase, steps: &[Step]) {
    for step in steps {
        let _ = match *step {
            Step::Create(label, value) => db
                .create::<Counter>(|c| {
                    c.label = format!("c{label}");
                    c.value = value;
                })
                .map(|_| ()),
            Step::Modify(id, value) => db.modify(Id::<Counter>::new(id), |c| c.value = value),
            Step::Rename(id, label) => {
                db.modify(Id::<Counter>::new(id), |c| c.label = format!("c{label}"))
            }
            Step::Remove(id) => db.remove(Id::<Counter>::new(id)).map(|_| ()),
        };
    }
}

fn seeded(seed: &[Step]) -> ObjectDatabase {
    let mut db = ObjectDatabase::new();
    db.add_index::<Counter>();
    run(&mut db, seed);
    db
}

proptest! {
    #[test]
    fn undo_restores_the_exact_state(
        seed in prop::collection::vec(step(), 0..24),
        steps in prop::collection::vec(step(), 1..48),
    ) {
        let mut db = seeded(&seed);
        let before = db.state_digest().unwrap();
        let next = db.index::<Counter>().unwrap().next_id();

        {
            let mut session = UndoSession::start(&mut db).unwrap();
            run(&mut session, &steps);
            session.undo().unwrap();
        }

        prop_assert_eq!(db.state_digest().unwrap(), before);
        prop_assert_eq!(db.index::<Counter>().unwrap().next_id(), next);
        prop_assert_eq!(db.undo_depth(), 0);
    }

    #[test]
    fn squashed_sessions_undo_together(
        outer in prop::collection::vec(step(), 0..24),
        inner in prop::collection::vec(step(), 0..24),
    ) {
        let mut db = seeded(&[]);
        let before = db.state_digest().unwrap();

        db.start_undo_session().unwrap();
        run(&mut db, &outer);
        {
            let mut session = UndoSession::start(&mut db).unwrap();
            run(&mut session, &inner);
            session.squash().unwrap();
        }
        db.undo().unwrap();

        prop_assert_eq!(db.state_digest().unwrap(), before);
    }

    #[test]
    fn dropped_session_rolls_back(steps in prop::collection::vec(step(), 1..32)) {
        let mut db = seeded(&[Step::Create(1, 10), Step::Create(2, 20)]);
        let before = db.state_digest().unwrap();
        {
            let mut session = UndoSession::start(&mut db).unwrap();
            run(&mut session, &steps);
        }
        prop_assert_eq!(db.state_digest().unwrap(), before);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// A transaction whose last transfer overdraws leaves no trace of the
    /// transfers before it.
    #[test]
    fn failed_transaction_is_atomic(
        transfers in prop::collection::vec((0usize..3, 0usize..3, 1i64..1_000), 1..6),
    ) {
        let mut chain = Chain::new();
        let before = chain.db.state_digest().unwrap();

        let mut ops: Vec<_> = transfers
            .iter()
            .filter(|(from, to, _)| from != to)
            .map(|(from, to, amount)| transfer(USERS[*from], USERS[*to], *amount))
            .collect();
        ops.push(transfer("alice", "bob", 2 * STARTING_BALANCE));

        prop_assert!(chain.push(ops, &USERS).is_err());
        prop_assert_eq!(chain.db.state_digest().unwrap(), before);
        prop_assert!(chain.db.pending_transactions().is_empty());
        for user in USERS {
            prop_assert_eq!(chain.core(user), STARTING_BALANCE);
        }
    }
}
