// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::job::JobId;
use crate::message::MessageId;

#[test]
fn generated_ids_carry_prefix() {
    let id = JobId::new();
    assert!(id.as_str().starts_with("job-"));
    assert_eq!(id.as_str().len(), 23);
}

#[test]
fn generated_ids_are_unique() {
    let a = JobId::new();
    let b = JobId::new();
    assert_ne!(a, b);
}

#[test]
fn id_from_str_roundtrip() {
    let id: JobId = "job-abc".into();
    assert_eq!(id.as_str(), "job-abc");
    assert_eq!(id, "job-abc");
    assert_eq!(id.to_string(), "job-abc");
}

#[test]
fn id_serde_is_transparent() {
    let id = MessageId::from_string("msg-xyz");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"msg-xyz\"");

    let parsed: MessageId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn id_derefs_to_str() {
    let id = JobId::from_string("job-1");
    fn takes_str(s: &str) -> usize {
        s.len()
    }
    assert_eq!(takes_str(&id), 5);
}
