mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use service::android::EnterpriseError;
use service::http::ApiError;
use service::database::models::{
    Activity, AndroidHost, AppConfig, AssetName, EnrollSecret, Enterprise, NewAndroidHost,
};
use service::provider::NotificationType;
use service::testkit::{MockProvider, MOCK_ENTERPRISE_NAME, MOCK_SERVER_SECRET, MOCK_SIGNUP_NAME};
use service::ServiceState;

#[tokio::test]
async fn test_signup_and_callback_configure_one_enterprise() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;

    let signup = state.android().enterprise_signup(admin.id).await.unwrap();
    assert_eq!(signup.name, MOCK_SIGNUP_NAME);

    let rows = Enterprise::list(db).await.unwrap();
    assert_eq!(rows.len(), 1);
    let signup_token = rows[0].signup_token.clone();
    assert!(signup_token.len() >= 43);
    assert_eq!(rows[0].signup_name, MOCK_SIGNUP_NAME);
    assert_eq!(
        provider.callback_urls(),
        vec![format!(
            "{}/api/v1/fleet/android_enterprise/connect/{}",
            common::SERVER_URL,
            signup_token
        )]
    );

    state
        .android()
        .enterprise_signup_callback(&signup_token, "et")
        .await
        .unwrap();

    let pubsub_token = common::pubsub_token(db).await;
    assert!(pubsub_token.len() >= 86);
    let created = provider.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].signup_url_name, MOCK_SIGNUP_NAME);
    assert_eq!(created[0].enterprise_token, "et");
    assert_eq!(
        created[0].pubsub_push_url,
        format!(
            "{}/api/v1/fleet/android_enterprise/pubsub?token={}",
            common::SERVER_URL,
            pubsub_token
        )
    );
    assert_eq!(created[0].enabled_notification_types, NotificationType::ALL.to_vec());

    let rows = Enterprise::list(db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].enterprise_id, "LC02zw8mx1");
    assert_eq!(rows[0].topic_id, "android-LC02zw8mx1");
    assert!(AppConfig::android_enabled_and_configured(db).await.unwrap());

    let activities = Activity::list(db).await.unwrap();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].activity_type, "enabled_android_mdm");
    assert_eq!(activities[0].user_id, Some(admin.id));

    let policies = provider.policies();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0].0, "enterprises/LC02zw8mx1/policies/1");
    assert_eq!(
        policies[0].1["statusReportingSettings"]["hardwareStatusEnabled"],
        true
    );

    assert_eq!(provider.secret().as_deref(), Some(MOCK_SERVER_SECRET));
    assert_eq!(
        common::asset(AssetName::AndroidFleetServerSecret, db)
            .await
            .unwrap(),
        MOCK_SERVER_SECRET.as_bytes()
    );
}

#[tokio::test]
async fn test_wrong_signup_token_has_no_side_effects() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;

    state.android().enterprise_signup(admin.id).await.unwrap();
    let real = common::last_signup_token(&provider);

    let mut near_miss = real.clone();
    near_miss.pop();
    for candidate in ["", "not-the-token", near_miss.as_str()] {
        let err = state
            .android()
            .enterprise_signup_callback(candidate, "et")
            .await
            .unwrap_err();
        assert!(matches!(err, EnterpriseError::InvalidSignupToken));
    }

    assert_eq!(provider.create_calls(), 0);
    assert!(common::asset(AssetName::AndroidPubSubToken, db)
        .await
        .is_none());
    assert!(!AppConfig::android_enabled_and_configured(db).await.unwrap());
}

#[tokio::test]
async fn test_missing_enterprise_token_is_rejected() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let admin = common::admin(state.database()).await;

    state.android().enterprise_signup(admin.id).await.unwrap();
    let token = common::last_signup_token(&provider);
    let err = state
        .android()
        .enterprise_signup_callback(&token, "")
        .await
        .unwrap_err();
    assert!(matches!(err, EnterpriseError::MissingEnterpriseToken));
    assert_eq!(provider.create_calls(), 0);
}

#[tokio::test]
async fn test_configured_mdm_refuses_new_signups() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let admin = common::admin(state.database()).await;
    common::configure(state.android(), &provider, &admin).await;

    let err = state.android().enterprise_signup(admin.id).await.unwrap_err();
    assert!(matches!(err, EnterpriseError::AlreadyConfigured));

    let token = common::last_signup_token(&provider);
    let err = state
        .android()
        .enterprise_signup_callback(&token, "et")
        .await
        .unwrap_err();
    assert!(matches!(err, EnterpriseError::AlreadyConfigured));
    assert_eq!(provider.signup_calls(), 1);
    assert_eq!(provider.create_calls(), 1);
}

#[tokio::test]
async fn test_localhost_server_url_is_rejected() {
    for url in [
        "http://localhost:8080",
        "http://127.0.0.1",
        "http://[::1]:8080",
    ] {
        let provider = Arc::new(MockProvider::new());
        let state = common::state_with(provider.clone(), &common::config(url)).await;
        let admin = common::admin(state.database()).await;

        let err = state.android().enterprise_signup(admin.id).await.unwrap_err();
        assert!(matches!(err, EnterpriseError::LocalhostServerUrl), "{url}");
        assert_eq!(provider.signup_calls(), 0);
        assert!(Enterprise::list(state.database()).await.unwrap().is_empty());
    }

    let provider = Arc::new(MockProvider::new());
    let mut config = common::config("http://localhost:8080");
    config.allow_localhost_server_url = true;
    let state = common::state_with(provider.clone(), &config).await;
    let admin = common::admin(state.database()).await;
    state.android().enterprise_signup(admin.id).await.unwrap();
    assert!(provider.callback_urls()[0].starts_with("http://localhost:8080/api/v1/"));
}

#[tokio::test]
async fn test_callback_removes_competing_signups() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let admin = common::admin(state.database()).await;

    state.android().enterprise_signup(admin.id).await.unwrap();
    state.android().enterprise_signup(admin.id).await.unwrap();
    let rows = Enterprise::list(state.database()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_ne!(rows[0].signup_token, rows[1].signup_token);

    let winner = rows[1].clone();
    state
        .android()
        .enterprise_signup_callback(&winner.signup_token, "et")
        .await
        .unwrap();

    let rows = Enterprise::list(state.database()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, winner.id);
    assert!(rows[0].is_registered());
}

#[tokio::test]
async fn test_get_enterprise_detects_upstream_deletion() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;
    common::configure(state.android(), &provider, &admin).await;

    AndroidHost::upsert(
        &NewAndroidHost {
            enterprise_specific_id: "ESID-1".to_string(),
            ..Default::default()
        },
        db,
    )
    .await
    .unwrap();

    let enterprise = state.android().get_enterprise().await.unwrap();
    assert_eq!(enterprise.enterprise_id, "LC02zw8mx1");

    provider.forget_enterprise(MOCK_ENTERPRISE_NAME);
    let err = state.android().get_enterprise().await.unwrap_err();
    assert!(matches!(err, EnterpriseError::DeletedUpstream));
    assert_eq!(err.to_string(), "Android Enterprise has been deleted");

    assert!(!AppConfig::android_enabled_and_configured(db).await.unwrap());
    assert!(!AndroidHost::get("ESID-1", db).await.unwrap().unwrap().enrolled);
}

#[tokio::test]
async fn test_get_enterprise_surfaces_upstream_failure() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let admin = common::admin(state.database()).await;
    common::configure(state.android(), &provider, &admin).await;

    provider.fail_list(true);
    let err = state.android().get_enterprise().await.unwrap_err();
    assert!(matches!(err, EnterpriseError::Upstream { .. }));
    assert!(err
        .to_string()
        .starts_with("verifying enterprise with upstream: "));
    // an unreachable upstream is not evidence of deletion
    assert!(AppConfig::android_enabled_and_configured(state.database())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_get_without_enterprise_is_not_found() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;

    let err = state.android().get_enterprise().await.unwrap_err();
    assert!(matches!(err, EnterpriseError::NotFound));
    assert_eq!(err.to_string(), "No enterprise found");
    assert_eq!(provider.list_calls(), 0);
}

#[tokio::test]
async fn test_delete_enterprise_clears_everything() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;
    common::configure(state.android(), &provider, &admin).await;
    AndroidHost::upsert(
        &NewAndroidHost {
            enterprise_specific_id: "ESID-2".to_string(),
            ..Default::default()
        },
        db,
    )
    .await
    .unwrap();

    state.android().delete_enterprise(admin.id).await.unwrap();

    assert_eq!(provider.deleted(), vec![MOCK_ENTERPRISE_NAME.to_string()]);
    assert!(Enterprise::list(db).await.unwrap().is_empty());
    assert!(!AppConfig::android_enabled_and_configured(db).await.unwrap());
    assert!(!AndroidHost::get("ESID-2", db).await.unwrap().unwrap().enrolled);
    for name in [
        AssetName::AndroidPubSubToken,
        AssetName::AndroidFleetServerSecret,
    ] {
        assert!(common::asset(name, db).await.is_none());
    }
    assert!(provider.secret().is_none());

    let activities = Activity::list(db).await.unwrap();
    let last = activities.last().unwrap();
    assert_eq!(last.activity_type, "disabled_android_mdm");
    assert_eq!(last.user_id, Some(admin.id));

    // a fresh signup is possible again
    state.android().enterprise_signup(admin.id).await.unwrap();
}

#[tokio::test]
async fn test_delete_ignores_upstream_failure() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let admin = common::admin(state.database()).await;
    common::configure(state.android(), &provider, &admin).await;

    provider.fail_delete(true);
    state.android().delete_enterprise(admin.id).await.unwrap();
    assert!(Enterprise::list(state.database()).await.unwrap().is_empty());
    assert!(!AppConfig::android_enabled_and_configured(state.database())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_enrollment_token_requires_secret_and_enterprise() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;
    EnrollSecret::create("global-secret", db).await.unwrap();

    let err = state
        .android()
        .enrollment_token("LC02zw8mx1", "global-secret")
        .await
        .unwrap_err();
    assert!(matches!(err, EnterpriseError::NotFound));

    common::configure(state.android(), &provider, &admin).await;

    let token = state
        .android()
        .enrollment_token("LC02zw8mx1", "global-secret")
        .await
        .unwrap();
    assert_eq!(token.enrollment_token, "et-1");
    assert_eq!(
        token.enrollment_url,
        "https://enterprise.google.com/android/enroll?et=et-1"
    );

    let requests = provider.token_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, MOCK_ENTERPRISE_NAME);
    assert_eq!(requests[0].1.policy_name, "enterprises/LC02zw8mx1/policies/1");
    assert!(requests[0].1.one_time_only);
    let additional: serde_json::Value =
        serde_json::from_str(&requests[0].1.additional_data).unwrap();
    assert_eq!(additional, json!({"EnrollSecret": "global-secret"}));

    let err = state
        .android()
        .enrollment_token("LC02zw8mx1", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, EnterpriseError::InvalidEnrollSecret));

    let err = state
        .android()
        .enrollment_token("other-enterprise", "global-secret")
        .await
        .unwrap_err();
    assert!(matches!(err, EnterpriseError::NotFound));
    assert_eq!(provider.token_requests().len(), 1);
}

#[tokio::test]
async fn test_restart_restores_provider_secret() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let admin = common::admin(state.database()).await;
    common::configure(state.android(), &provider, &admin).await;

    let fresh = Arc::new(MockProvider::new());
    assert!(fresh.secret().is_none());
    ServiceState::with_provider(
        state.database().clone(),
        fresh.clone(),
        &common::config(common::SERVER_URL),
    )
    .await
    .unwrap();
    assert_eq!(fresh.secret().as_deref(), Some(MOCK_SERVER_SECRET));
}

#[tokio::test]
async fn test_signup_requires_private_key() {
    let provider = Arc::new(MockProvider::new());
    let mut config = common::config(common::SERVER_URL);
    config.server_private_key = None;
    let state = common::state_with(provider.clone(), &config).await;
    let admin = common::admin(state.database()).await;

    let err = state
        .android()
        .enterprise_signup(admin.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EnterpriseError::MissingPrivateKey));
    assert!(err.to_string().contains("missing required private key"));
    assert_eq!(provider.signup_calls(), 0);
    assert!(Enterprise::list(state.database()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_secrets_are_encrypted_at_rest() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;
    common::configure(state.android(), &provider, &admin).await;

    let pubsub_token = common::pubsub_token(db).await;
    let stored = common::raw_asset(AssetName::AndroidPubSubToken, db).await;
    assert_ne!(stored, pubsub_token.as_bytes());
    assert!(!stored
        .windows(pubsub_token.len())
        .any(|w| w == pubsub_token.as_bytes()));

    let stored = common::raw_asset(AssetName::AndroidFleetServerSecret, db).await;
    assert!(!stored
        .windows(MOCK_SERVER_SECRET.len())
        .any(|w| w == MOCK_SERVER_SECRET.as_bytes()));

    // a restart under a different key cannot read the stored secret
    let mut config = common::config(common::SERVER_URL);
    config.server_private_key = Some("fedcba9876543210fedcba9876543210".to_string());
    let restarted =
        ServiceState::with_provider(db.clone(), Arc::new(MockProvider::new()), &config).await;
    assert!(restarted.is_err());
}

#[tokio::test]
async fn test_signup_url_failure_removes_pending_row() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;

    provider.fail_signup(true);
    let err = state
        .android()
        .enterprise_signup(admin.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnterpriseError::Upstream {
            context: "create signup url",
            ..
        }
    ));
    assert_eq!(provider.signup_calls(), 1);
    assert!(Enterprise::list(db).await.unwrap().is_empty());
    assert!(!AppConfig::android_enabled_and_configured(db).await.unwrap());

    provider.fail_signup(false);
    state.android().enterprise_signup(admin.id).await.unwrap();
    assert_eq!(Enterprise::list(db).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_failure_registers_nothing() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;

    state.android().enterprise_signup(admin.id).await.unwrap();
    let token = common::last_signup_token(&provider);

    provider.fail_create(true);
    let err = state
        .android()
        .enterprise_signup_callback(&token, "et")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnterpriseError::Upstream {
            context: "create enterprise",
            ..
        }
    ));

    assert!(Enterprise::get_registered(db).await.unwrap().is_none());
    let rows = Enterprise::list(db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_registered());
    assert!(!AppConfig::android_enabled_and_configured(db).await.unwrap());
    assert!(provider.policies().is_empty());
    assert!(common::asset(AssetName::AndroidFleetServerSecret, db)
        .await
        .is_none());

    // the pending signup can still be completed
    provider.fail_create(false);
    state
        .android()
        .enterprise_signup_callback(&token, "et")
        .await
        .unwrap();
    assert!(AppConfig::android_enabled_and_configured(db).await.unwrap());
}

#[tokio::test]
async fn test_policy_failure_leaves_mdm_off() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;

    state.android().enterprise_signup(admin.id).await.unwrap();
    let token = common::last_signup_token(&provider);

    provider.fail_policy(true);
    let err = state
        .android()
        .enterprise_signup_callback(&token, "et")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnterpriseError::Upstream {
            context: "install default policy",
            ..
        }
    ));

    assert!(!AppConfig::android_enabled_and_configured(db).await.unwrap());
    assert!(Activity::list(db).await.unwrap().is_empty());
    assert_eq!(provider.create_calls(), 1);
}

#[tokio::test]
async fn test_upstream_deletion_is_not_found_even_if_cleanup_fails() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let db = state.database();
    let admin = common::admin(db).await;
    common::configure(state.android(), &provider, &admin).await;

    for table in ["app_config", "android_hosts"] {
        sqlx::query(&format!("DROP TABLE {table}"))
            .execute(&**db)
            .await
            .unwrap();
    }

    provider.forget_enterprise(MOCK_ENTERPRISE_NAME);
    let err = state.android().get_enterprise().await.unwrap_err();
    assert!(matches!(err, EnterpriseError::DeletedUpstream));
    assert_eq!(
        ApiError::from(err).status(),
        axum::http::StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_wait_until_configured_resolves_after_callback() {
    let provider = Arc::new(MockProvider::new());
    let state = common::state(provider.clone()).await;
    let admin = common::admin(state.database()).await;

    let android = state.android().clone();
    let waiter = tokio::spawn(async move {
        android
            .wait_until_configured(Duration::from_millis(5))
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    common::configure(state.android(), &provider, &admin).await;
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
