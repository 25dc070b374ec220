//! Property-based tests for contract log invariants
//!
//! These tests use proptest to verify:
//! - Round-trip: an entry rebuilt from its record keeps its hash
//! - Whitelist gate: non-whitelisted deliveries change nothing
//! - Root shape: roots with a parent never create contracts
//! - Isolation: actions never touch unrelated contracts
//! - Navigation: backward then forward restores the position
//! - Deterministic replay: same log, same state

use contract_log::{
    registry::kinds::{GROUP_CONTRACT, IDENTITY_CONTRACT, PAYMENT, VOTE},
    Config, ContractStatus, Engine, Entry, EntryRecord, Error, JsonObject, Registry,
};
use proptest::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

/// Strategy for entry payloads
fn data_strategy() -> impl Strategy<Value = JsonObject> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..5).prop_map(|fields| {
        fields
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect()
    })
}

/// Strategy for registered type tags
fn entry_type_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(GROUP_CONTRACT),
        Just(IDENTITY_CONTRACT),
        Just(PAYMENT),
        Just(VOTE),
    ]
}

/// Strategy for arbitrary wire records
fn record_strategy() -> impl Strategy<Value = EntryRecord> {
    (
        entry_type_strategy(),
        data_strategy(),
        prop::option::of("[1-9A-HJ-NP-Za-km-z]{20,46}"),
    )
        .prop_map(|(entry_type, data, parent)| EntryRecord::new(entry_type, data, parent))
}

/// Open an engine in a fresh temp directory
async fn create_test_engine() -> (Engine, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();

    let engine = Engine::open(config, Registry::with_defaults()).await.unwrap();
    (engine, temp_dir)
}

/// Whitelist and admit a group root, returning its id
async fn admit_group(engine: &Engine, data: JsonObject) -> String {
    let root = Entry::root(GROUP_CONTRACT, data).unwrap();
    engine.whitelist(root.to_hash()).await.unwrap();
    engine
        .handle_event(root.to_hash(), root.to_hash(), root.record())
        .await
        .unwrap()
        .contract_id
}

/// Append `count` payments to a contract, returning the hashes in order
async fn admit_payments(engine: &Engine, contract_id: &str, count: usize) -> Vec<String> {
    let mut parent = contract_id.to_string();
    let mut hashes = Vec::with_capacity(count);
    for amount in 0..count {
        let mut data = JsonObject::new();
        data.insert("amount".to_string(), Value::from(amount as u64));
        let payment = Entry::action(PAYMENT, data, parent).unwrap();
        engine
            .handle_event(contract_id, payment.to_hash(), payment.record())
            .await
            .unwrap();
        parent = payment.to_hash().to_string();
        hashes.push(parent.clone());
    }
    hashes
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: fromObject(toObject(E), toHash(E)) reproduces E
    #[test]
    fn prop_entry_round_trip(record in record_strategy()) {
        let entry = Entry::new(record).unwrap();
        let rebuilt = Entry::from_object(entry.to_object(), entry.to_hash()).unwrap();
        prop_assert_eq!(rebuilt.to_hash(), entry.to_hash());
        prop_assert_eq!(rebuilt, entry);
    }

    /// Property: any content change is an integrity failure
    #[test]
    fn prop_tampered_record_rejected(record in record_strategy(), extra in "[a-z]{9,12}") {
        let entry = Entry::new(record).unwrap();
        let mut tampered = entry.to_object();
        tampered.data.insert(extra, Value::Bool(true));

        let result = Entry::from_object(tampered, entry.to_hash());
        let is_integrity_err = matches!(result, Err(Error::Integrity { .. }));
        prop_assert!(is_integrity_err);
    }

    /// Property: the hash ignores payload key insertion order
    #[test]
    fn prop_hash_ignores_key_order(data in data_strategy()) {
        let reversed: JsonObject = data
            .iter()
            .rev()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let a = Entry::root(GROUP_CONTRACT, data).unwrap();
        let b = Entry::root(GROUP_CONTRACT, reversed).unwrap();
        prop_assert_eq!(a.to_hash(), b.to_hash());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: non-whitelisted deliveries leave store and contracts unchanged
    #[test]
    fn prop_not_whitelisted_is_inert(record in record_strategy(), stranger in "x[a-z]{4,10}") {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, _dir) = create_test_engine().await;
            let handle = engine.handle();
            let group = admit_group(&engine, JsonObject::new()).await;

            let contracts_before = handle.contracts().await.unwrap();
            let whitelist_before = handle.whitelist_ids().await.unwrap();
            let hash = Entry::new(record.clone()).unwrap().to_hash().to_string();

            let result = engine.handle_event(stranger.clone(), hash.clone(), &record).await;
            let rejected = matches!(result, Err(Error::NotWhitelisted(_)));
            prop_assert!(rejected);

            prop_assert_eq!(handle.contracts().await.unwrap(), contracts_before);
            prop_assert_eq!(handle.whitelist_ids().await.unwrap(), whitelist_before);
            prop_assert!(handle.contract_log(stranger.clone()).await.unwrap().is_empty());
            prop_assert!(handle.contract_log(hash).await.unwrap().is_empty());
            prop_assert_eq!(handle.contract_log(group).await.unwrap().len(), 1);
            prop_assert_eq!(engine.metrics().rejected("not_whitelisted"), 1);

            engine.shutdown().await.unwrap();
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: a root that declares a parent never creates a contract
    #[test]
    fn prop_malformed_root_rejected(
        root_type in prop_oneof![Just(GROUP_CONTRACT), Just(IDENTITY_CONTRACT)],
        data in data_strategy(),
        parent in "[1-9A-HJ-NP-Za-km-z]{20,46}",
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, _dir) = create_test_engine().await;
            let handle = engine.handle();

            let entry = Entry::new(EntryRecord::new(root_type, data, Some(parent))).unwrap();
            engine.whitelist("c1").await.unwrap();

            let result = engine.handle_event("c1", entry.to_hash(), entry.record()).await;
            let malformed = matches!(result, Err(Error::MalformedRoot { .. }));
            prop_assert!(malformed);

            prop_assert!(handle.contracts().await.unwrap().is_empty());
            prop_assert_eq!(handle.status(entry.to_hash()).await.unwrap(), ContractStatus::Unknown);
            prop_assert_eq!(handle.status("c1").await.unwrap(), ContractStatus::Whitelisted);
            prop_assert!(handle.contract_log(entry.to_hash()).await.unwrap().is_empty());
            prop_assert!(handle.current_contract().await.unwrap().is_none());

            engine.shutdown().await.unwrap();
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: actions on one contract never alter another
    #[test]
    fn prop_unrelated_contracts_unaffected(count in 1usize..10) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, _dir) = create_test_engine().await;

            let mut a_data = JsonObject::new();
            a_data.insert("groupName".to_string(), Value::from("a"));
            let mut b_data = JsonObject::new();
            b_data.insert("groupName".to_string(), Value::from("b"));

            let a = admit_group(&engine, a_data).await;
            let b = admit_group(&engine, b_data).await;
            let b_before = engine.contract(b.clone()).await.unwrap();

            admit_payments(&engine, &a, count).await;

            let a_after = engine.contract(a.clone()).await.unwrap();
            prop_assert_eq!(a_after.state["payments"].as_array().unwrap().len(), count);
            prop_assert_eq!(engine.contract(b.clone()).await.unwrap(), b_before);
            prop_assert_eq!(engine.handle().contract_log(b).await.unwrap().len(), 1);

            engine.shutdown().await.unwrap();
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: k steps backward then k steps forward restores the position
    #[test]
    fn prop_backward_forward_restores(count in 1usize..8, steps in 1usize..8) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, _dir) = create_test_engine().await;
            let handle = engine.handle();

            let group = admit_group(&engine, JsonObject::new()).await;
            let hashes = admit_payments(&engine, &group, count).await;
            let start = handle.position().await.unwrap();
            prop_assert_eq!(start.as_deref(), hashes.last().map(String::as_str));

            let mut moved = 0;
            for _ in 0..steps {
                if handle.move_backward().await.unwrap() {
                    moved += 1;
                }
            }
            // The log has count + 1 entries, so at most count backward moves
            prop_assert_eq!(moved, steps.min(count));

            for _ in 0..moved {
                prop_assert!(handle.move_forward().await.unwrap());
            }
            prop_assert!(!handle.move_forward().await.unwrap());
            prop_assert_eq!(handle.position().await.unwrap(), start);

            engine.shutdown().await.unwrap();
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: contract state is deterministically derived from its log
    #[test]
    fn prop_deterministic_replay(payloads in prop::collection::vec(data_strategy(), 1..12)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, _dir) = create_test_engine().await;
            let group = admit_group(&engine, JsonObject::new()).await;

            let mut parent = group.clone();
            for data in payloads {
                let vote = Entry::action(VOTE, data, parent).unwrap();
                engine
                    .handle_event(group.clone(), vote.to_hash(), vote.record())
                    .await
                    .unwrap();
                parent = vote.to_hash().to_string();
            }

            let live = engine.contract(group.clone()).await.unwrap();
            let first = engine.rebuild_contract(group.clone()).await.unwrap();
            let second = engine.rebuild_contract(group).await.unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.state, live.state);
            prop_assert_eq!(first.head, live.head);

            engine.shutdown().await.unwrap();
            Ok::<(), TestCaseError>(())
        })?;
    }
}
