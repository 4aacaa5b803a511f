//! Capacity rule scenarios written against the Given-When-Then harness

#![allow(clippy::unwrap_used)] // Tests can unwrap

use rollcall_core::capacity::{AppliedChange, Outcome, SkipReason};
use rollcall_core::command::{IdempotencyKey, RegistrationCommand};
use rollcall_core::environment::Clock;
use rollcall_core::types::{
    CommandKind, EventCapacity, EventId, Registration, RegistrationStatus, Rejection, UserId,
};
use rollcall_testing::capacity_test::assertions::{assert_status, assert_within_capacity};
use rollcall_testing::{CapacityTest, test_clock};

fn alice() -> UserId {
    UserId::new("alice").unwrap()
}

fn command(event_id: EventId, kind: CommandKind, nonce: &str) -> RegistrationCommand {
    let key = IdempotencyKey::from_nonce(&event_id, &alice(), kind, nonce).unwrap();
    RegistrationCommand::new(event_id, alice(), kind, key, test_clock().now())
}

fn fresh(event_id: EventId) -> Registration {
    Registration::unregistered(event_id, alice(), test_clock().now())
}

fn full(event_id: EventId) -> EventCapacity {
    let mut capacity = EventCapacity::new(event_id, 2);
    capacity.registered_count = 2;
    capacity
}

#[test]
fn redelivered_register_counts_once() {
    let event_id = EventId::new();
    let register = command(event_id, CommandKind::Register, "r1");

    CapacityTest::new()
        .given_capacity(EventCapacity::new(event_id, 2))
        .given_registration(fresh(event_id))
        .when_command(register.clone())
        .when_command(register)
        .then_outcomes(|outcomes| {
            assert_eq!(
                outcomes,
                [
                    Outcome::Applied(AppliedChange::Registered),
                    Outcome::Skipped(SkipReason::Duplicate),
                ]
            );
        })
        .then_state(|state| {
            assert_eq!(state.capacity.registered_count, 1);
            assert_status(state, RegistrationStatus::Registered);
        })
        .run();
}

#[test]
fn redelivered_register_on_full_event_is_still_turned_down() {
    let event_id = EventId::new();
    let register = command(event_id, CommandKind::Register, "r1");
    let key = register.idempotency_key.as_str().to_string();

    CapacityTest::new()
        .given_capacity(full(event_id))
        .given_registration(fresh(event_id))
        .when_command(register.clone())
        .when_command(register)
        .then_outcomes(|outcomes| {
            assert_eq!(
                outcomes,
                [
                    Outcome::Skipped(SkipReason::EventFull),
                    Outcome::Skipped(SkipReason::EventFull),
                ]
            );
        })
        .then_state(move |state| {
            assert_within_capacity(state);
            assert_eq!(state.registration.rejection, Some(Rejection::EventFull));
            assert_eq!(state.registration.last_applied_key, None);
            assert!(!state.has_applied(&key));
        })
        .run();
}

#[test]
fn unregister_without_registration_changes_nothing() {
    let event_id = EventId::new();

    CapacityTest::new()
        .given_capacity(EventCapacity::new(event_id, 2))
        .given_registration(fresh(event_id))
        .when_command(command(event_id, CommandKind::Unregister, "u1"))
        .then_outcomes(|outcomes| {
            assert_eq!(outcomes, [Outcome::Skipped(SkipReason::NotRegistered)]);
        })
        .then_state(|state| {
            assert_eq!(state.capacity.registered_count, 0);
            assert!(state.applied_keys.is_empty());
        })
        .run();
}

#[test]
fn second_register_with_new_key_is_already_registered() {
    let event_id = EventId::new();

    CapacityTest::new()
        .given_capacity(EventCapacity::new(event_id, 3))
        .given_registration(fresh(event_id))
        .when_command(command(event_id, CommandKind::Register, "r1"))
        .when_command(command(event_id, CommandKind::Register, "r2"))
        .then_outcomes(|outcomes| {
            assert_eq!(outcomes[1], Outcome::Skipped(SkipReason::AlreadyRegistered));
        })
        .then_state(|state| assert_eq!(state.capacity.registered_count, 1))
        .run();
}

#[test]
fn key_applied_before_is_a_duplicate_whatever_the_row_says() {
    let event_id = EventId::new();
    let register = command(event_id, CommandKind::Register, "r1");

    CapacityTest::new()
        .given_capacity(EventCapacity::new(event_id, 2))
        .given_registration(fresh(event_id))
        .given_applied_key(register.idempotency_key.as_str())
        .when_command(register)
        .then_outcomes(|outcomes| {
            assert_eq!(outcomes, [Outcome::Skipped(SkipReason::Duplicate)]);
        })
        .then_state(|state| {
            assert_eq!(state.capacity.registered_count, 0);
            assert_status(state, RegistrationStatus::Unregistered);
        })
        .run();
}
