//! Property-based tests using proptest
//!
//! These tests check create/read round-trips, not-found classification for
//! unknown identifiers, identifier validation and drift detection using
//! randomized configurations.

use assessctl::api::client::RemoteClient;
use assessctl::api::memory::{CallKind, MemoryClient};
use assessctl::assessment::drift::diff;
use assessctl::assessment::lookup::find_assessment_by_id;
use assessctl::assessment::model::{
    AccountRef, DesiredConfiguration, DestinationType, LocatorScheme, ReportsDestination,
    ResourceIdentifier, Role, RoleType, Scope, ServiceRef,
};
use assessctl::assessment::reconciler::{Reconciler, ResourceInstance};
use assessctl::context::CallContext;
use assessctl::{Error, Operation};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Generate an arbitrary role binding
fn arb_role() -> impl Strategy<Value = Role> {
    (
        "[0-9]{12}",
        "[a-zA-Z][a-zA-Z0-9+=,.@_-]{0,30}",
        prop_oneof![Just(RoleType::ProcessOwner), Just(RoleType::ResourceOwner)],
    )
        .prop_map(|(account, name, role_type)| Role {
            role_arn: format!("arn:aws:iam::{account}:role/{name}"),
            role_type,
        })
}

/// Generate an arbitrary scope, possibly empty
fn arb_scope() -> impl Strategy<Value = Scope> {
    (
        prop::collection::vec("[0-9]{12}", 0..4),
        prop::collection::vec(
            prop_oneof!["S3", "EC2", "IAM", "CloudTrail", "Lambda"],
            0..4,
        ),
    )
        .prop_map(|(accounts, services)| Scope {
            aws_accounts: accounts.into_iter().map(|id| AccountRef { id }).collect(),
            aws_services: services
                .into_iter()
                .map(|service_name| ServiceRef { service_name })
                .collect(),
        })
}

/// Generate an arbitrary valid desired configuration
fn arb_desired() -> impl Strategy<Value = DesiredConfiguration> {
    (
        "[a-zA-Z0-9][a-zA-Z0-9 _-]{0,60}",
        prop::option::of("[a-zA-Z0-9 .,]{0,120}"),
        "[a-f0-9]{8}-[a-f0-9]{4}",
        prop::collection::vec(arb_role(), 0..4),
        arb_scope(),
        "[a-z0-9][a-z0-9.-]{2,40}",
        prop::collection::btree_map("[a-z]{1,10}", "[a-z0-9]{0,10}", 0..5),
    )
        .prop_map(
            |(name, description, framework_id, roles, scope, bucket, tags)| DesiredConfiguration {
                name,
                description,
                framework_id,
                roles,
                scope,
                assessment_reports_destination: ReportsDestination {
                    destination: format!("s3://{bucket}"),
                    destination_type: DestinationType::S3,
                },
                tags,
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every generated configuration is accepted by validation
    #[test]
    fn generated_configurations_are_valid(desired in arb_desired()) {
        prop_assert!(desired.validate().is_ok());
    }

    /// Create then Read returns the configured fields
    #[test]
    fn create_then_read_round_trips(desired in arb_desired()) {
        tokio_test::block_on(async {
            let client = Arc::new(MemoryClient::new());
            let reconciler = Reconciler::new(Arc::clone(&client), LocatorScheme::default());
            let ctx = CallContext::background();
            let mut instance = ResourceInstance::new("auditmanager_assessment.prop");

            reconciler.create(&ctx, &mut instance, &desired).await.unwrap();
            let record = reconciler.read(&ctx, &mut instance).await.unwrap().unwrap();

            prop_assert_eq!(record.desired(), desired.clone());
            prop_assert!(diff(&record, &desired).is_empty());
            Ok(())
        })?;
    }

    /// Identifiers never returned by Create are NotFound
    #[test]
    fn unknown_identifiers_are_not_found(raw in "[a-zA-Z0-9_-]{1,64}") {
        tokio_test::block_on(async {
            let client = MemoryClient::new();
            let err = find_assessment_by_id(&client, &CallContext::background(), &raw)
                .await
                .unwrap_err();

            prop_assert!(
                matches!(err, Error::NotFound { operation: Operation::Read, .. }),
                "unexpected error: {:?}",
                err
            );
            prop_assert_eq!(client.call_count(CallKind::Get), 1);
            Ok(())
        })?;
    }

    /// Identifiers from Create are always found again
    #[test]
    fn created_identifiers_are_found(desired in arb_desired()) {
        tokio_test::block_on(async {
            let client = MemoryClient::new();
            let id = client.create(&desired).await.unwrap();
            let record = find_assessment_by_id(&client, &CallContext::background(), id.as_str())
                .await
                .unwrap();
            prop_assert_eq!(record.id, id);
            Ok(())
        })?;
    }

    /// Identifiers with path or query characters are rejected up front
    #[test]
    fn identifiers_with_unsafe_characters_are_rejected(
        prefix in "[a-z0-9]{0,8}",
        bad in prop_oneof!["/", "\\?", "#", "%", " ", "&"],
        suffix in "[a-z0-9]{0,8}"
    ) {
        let raw = format!("{prefix}{bad}{suffix}");
        let err = ResourceIdentifier::parse(&raw).unwrap_err();
        prop_assert!(err.is_validation());
    }

    /// Valid identifiers survive a parse and display cycle unchanged
    #[test]
    fn identifier_display_matches_input(raw in "[a-zA-Z0-9_-][a-zA-Z0-9_.-]{0,100}") {
        let id = ResourceIdentifier::parse(&raw).unwrap();
        prop_assert_eq!(id.to_string(), raw);
    }

    /// Order of roles and scope entries never counts as drift
    #[test]
    fn reordering_is_not_drift(desired in arb_desired()) {
        let id = ResourceIdentifier::parse("prop").unwrap();
        let mut record = assessctl::assessment::model::ResourceRecord::from_desired(id, &desired);
        record.roles.reverse();
        record.scope.aws_accounts.reverse();
        record.scope.aws_services.reverse();
        prop_assert!(diff(&record, &desired).is_empty());
    }

    /// A changed name is always reported and never forces replacement
    #[test]
    fn renaming_is_an_in_place_change(desired in arb_desired(), suffix in "[a-z]{1,8}") {
        let id = ResourceIdentifier::parse("prop").unwrap();
        let record = assessctl::assessment::model::ResourceRecord::from_desired(id, &desired);
        let mut renamed = desired.clone();
        renamed.name = format!("{}-{}", desired.name, suffix);

        let changes = diff(&record, &renamed);
        prop_assert_eq!(changes.len(), 1);
        prop_assert!(!changes[0].requires_replace());
    }
}

#[test]
fn empty_tag_map_is_equal_to_missing_tags() {
    let desired: DesiredConfiguration = serde_json::from_str(
        r#"{"name":"n","framework_id":"f","assessment_reports_destination":{"destination":"s3://b","destination_type":"S3"}}"#,
    )
    .unwrap();
    assert_eq!(desired.tags, BTreeMap::new());
}
