use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::broadcast;

use super::*;
use crate::auth::events::BroadcastPublisher;
use crate::auth::sessions::MemorySessionStore;
use crate::auth::users::MemoryUserStore;

const PASSWORD: &str = "p@ssw0rd";

struct Fixture {
    service: AuthService,
    users: Arc<MemoryUserStore>,
    sessions: Arc<MemorySessionStore>,
    policy: Arc<PolicyEngine>,
    events: broadcast::Receiver<AuthEvent>,
}

fn config() -> AuthConfig {
    let mut config = AuthConfig::with_secrets("access-secret-for-tests", "refresh-secret-for-tests");
    config.hash_cost = 4;
    config
}

fn fixture_with(config: AuthConfig) -> Fixture {
    let users = Arc::new(MemoryUserStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let policy = Arc::new(PolicyEngine::with_defaults());
    let publisher = BroadcastPublisher::new(64);
    let events = publisher.subscribe();
    let service = AuthService::new(
        &config,
        users.clone(),
        sessions.clone(),
        policy.clone(),
        Arc::new(publisher),
    )
    .unwrap();
    Fixture {
        service,
        users,
        sessions,
        policy,
        events,
    }
}

fn fixture() -> Fixture {
    fixture_with(config())
}

impl Fixture {
    async fn alice(&self) -> User {
        self.service
            .create_user("alice", "alice@example.com", PASSWORD, vec![])
            .await
            .unwrap()
    }

    async fn login(&self, identifier: &str) -> TokenPair {
        self.service
            .login(identifier, PASSWORD, ClientInfo::default())
            .await
            .unwrap()
    }

    fn drain_events(&mut self) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            names.push(event.name());
        }
        names
    }
}

#[tokio::test]
async fn login_by_username_or_email() {
    let f = fixture();
    let alice = f.alice().await;

    let by_name = f.login("  ALICE ").await;
    let by_email = f.login("Alice@Example.com").await;
    assert_ne!(by_name.session_id, by_email.session_id);
    assert_eq!(by_name.token_type, "Bearer");
    assert_eq!(by_name.expires_in, 900);
    assert!(by_name.refresh_expires_at > by_name.expires_at);

    let claims = f.service.validate_token(&by_name.access_token).await.unwrap();
    assert_eq!(claims.sub, alice.id.to_string());
    assert_eq!(claims.username, "alice");
    assert_eq!(claims.roles, vec!["user"]);
    assert_eq!(claims.session_id, by_name.session_id.to_string());
    assert_eq!(f.sessions.len().await, 2);
}

#[tokio::test]
async fn unknown_user_and_wrong_password_look_the_same() {
    let f = fixture();
    f.alice().await;

    let unknown = f
        .service
        .login("mallory", PASSWORD, ClientInfo::default())
        .await
        .unwrap_err();
    let wrong = f
        .service
        .login("alice", "not-the-password", ClientInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert_eq!(unknown.to_string(), wrong.to_string());
    assert!(f.sessions.is_empty().await);
}

#[tokio::test]
async fn login_requires_both_fields() {
    let f = fixture();
    assert!(matches!(
        f.service.login(" ", PASSWORD, ClientInfo::default()).await,
        Err(AuthError::BadRequest(_))
    ));
    assert!(matches!(
        f.service.login("alice", "", ClientInfo::default()).await,
        Err(AuthError::BadRequest(_))
    ));
}

#[tokio::test]
async fn inactive_principal_cannot_login() {
    let f = fixture();
    let alice = f.alice().await;
    f.service.set_active(alice.id, false).await.unwrap();
    assert!(matches!(
        f.service.login("alice", PASSWORD, ClientInfo::default()).await,
        Err(AuthError::AccountDisabled)
    ));
}

#[tokio::test]
async fn login_records_client_and_emits_event() {
    let mut f = fixture();
    let alice = f.alice().await;
    let client = ClientInfo {
        device: "living-room-tv".into(),
        remote_addr: "10.0.0.7".into(),
        user_agent: "narwhal-tv/1.0".into(),
    };
    let pair = f.service.login("alice", PASSWORD, client).await.unwrap();

    let session = f.sessions.by_id(pair.session_id).await.unwrap();
    assert_eq!(session.device, "living-room-tv");
    assert_eq!(session.remote_addr, "10.0.0.7");
    assert_eq!(session.user_agent, "narwhal-tv/1.0");
    assert_eq!(session.refresh_token_hash, hash_refresh_token(&pair.refresh_token));

    let stored = f.users.get(alice.id).await.unwrap();
    assert!(stored.last_login_at.is_some());
    assert_eq!(f.drain_events(), vec!["user.created", "user.logged_in"]);
}

#[tokio::test]
async fn weak_hashes_are_upgraded_on_login() {
    let mut cfg = config();
    cfg.hash_cost = 5;
    let f = fixture_with(cfg);
    let weak = PasswordHasher::new(4).unwrap().hash(PASSWORD).unwrap();
    let alice = f
        .users
        .create(NewUser {
            id: uuidv7(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: weak.clone(),
            roles: vec!["user".into()],
        })
        .await
        .unwrap();

    f.login("alice").await;
    let stored = f.users.get(alice.id).await.unwrap();
    assert_ne!(stored.password_hash, weak);
    assert!(stored.password_hash.starts_with("$2b$05$"));
    assert!(f.service.hasher().verify(PASSWORD, &stored.password_hash));
}

#[tokio::test]
async fn refresh_reuses_session_and_token() {
    let f = fixture();
    f.alice().await;
    let pair = f.login("alice").await;

    let refreshed = f.service.refresh(&pair.refresh_token).await.unwrap();
    assert_eq!(refreshed.session_id, pair.session_id);
    assert_eq!(refreshed.refresh_token, pair.refresh_token);
    let claims = f.service.validate_token(&refreshed.access_token).await.unwrap();
    assert_eq!(claims.session_id, pair.session_id.to_string());

    // Still usable: no rotation by default.
    f.service.refresh(&pair.refresh_token).await.unwrap();
}

#[tokio::test]
async fn refresh_rejects_unknown_tokens() {
    let f = fixture();
    for token in ["", "definitely-not-issued"] {
        assert!(matches!(
            f.service.refresh(token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}

#[tokio::test]
async fn refresh_of_expired_session_deletes_it() {
    let f = fixture();
    let alice = f.alice().await;
    let token = generate_refresh_token();
    let now = Utc::now();
    let session = f
        .sessions
        .create(Session {
            id: uuidv7(),
            user_id: alice.id,
            refresh_token_hash: hash_refresh_token(&token),
            device: String::new(),
            remote_addr: String::new(),
            user_agent: String::new(),
            expires_at: now - Duration::hours(1),
            created_at: now - Duration::hours(2),
            last_used_at: now - Duration::hours(2),
        })
        .await
        .unwrap();

    assert!(matches!(
        f.service.refresh(&token).await,
        Err(AuthError::InvalidToken(_))
    ));
    assert!(f.sessions.by_id(session.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn refresh_for_inactive_principal_is_refused() {
    let f = fixture();
    let alice = f.alice().await;
    let pair = f.login("alice").await;
    f.users.set_active(alice.id, false).await.unwrap();

    assert!(matches!(
        f.service.refresh(&pair.refresh_token).await,
        Err(AuthError::AccountDisabled)
    ));
    assert!(f.sessions.is_empty().await);
}

#[tokio::test]
async fn rotation_invalidates_the_previous_refresh_token() {
    let mut cfg = config();
    cfg.rotate_refresh_tokens = true;
    let f = fixture_with(cfg);
    f.alice().await;
    let pair = f.login("alice").await;

    let rotated = f.service.refresh(&pair.refresh_token).await.unwrap();
    assert_ne!(rotated.refresh_token, pair.refresh_token);
    assert_eq!(rotated.session_id, pair.session_id);
    assert!(matches!(
        f.service.refresh(&pair.refresh_token).await,
        Err(AuthError::InvalidToken(_))
    ));
    f.service.refresh(&rotated.refresh_token).await.unwrap();
}

#[tokio::test]
async fn concurrent_rotation_has_one_winner() {
    let mut cfg = config();
    cfg.rotate_refresh_tokens = true;
    let f = fixture_with(cfg);
    f.alice().await;
    let pair = f.login("alice").await;

    let (a, b) = tokio::join!(
        f.service.refresh(&pair.refresh_token),
        f.service.refresh(&pair.refresh_token)
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
}

#[tokio::test]
async fn logout_checks_ownership() {
    let mut f = fixture();
    let alice = f.alice().await;
    let bob = f
        .service
        .create_user("bob", "bob@example.com", PASSWORD, vec![])
        .await
        .unwrap();
    let pair = f.login("alice").await;

    assert!(matches!(
        f.service.logout(bob.id, pair.session_id).await,
        Err(AuthError::Forbidden(_))
    ));
    f.service.logout(alice.id, pair.session_id).await.unwrap();
    assert!(matches!(
        f.service.validate_token(&pair.access_token).await,
        Err(AuthError::InvalidToken(_))
    ));
    assert!(f.service.logout(alice.id, pair.session_id).await.unwrap_err().is_not_found());
    assert!(f.drain_events().contains(&"user.logged_out"));
}

#[tokio::test]
async fn concurrent_logout_all_both_succeed() {
    let f = fixture();
    let alice = f.alice().await;
    for _ in 0..3 {
        f.login("alice").await;
    }
    let (a, b) = tokio::join!(f.service.logout_all(alice.id), f.service.logout_all(alice.id));
    assert_eq!(a.unwrap() + b.unwrap(), 3);
    assert!(f.service.list_sessions(alice.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn validate_rejects_foreign_and_malformed_tokens() {
    let f = fixture();
    let alice = f.alice().await;
    let pair = f.login("alice").await;

    assert!(matches!(
        f.service.validate_token(&pair.refresh_token).await,
        Err(AuthError::InvalidToken(_))
    ));
    assert!(matches!(
        f.service.validate_token("a.b.c").await,
        Err(AuthError::InvalidToken(_))
    ));

    let now = Utc::now();
    let codec = f.service.codec();
    let refresh_claims = codec.claims_for(
        &alice,
        vec![],
        Some(pair.session_id),
        TokenType::Refresh,
        now,
        Duration::minutes(5),
    )
    .unwrap();
    let refresh_family = codec.issue(&refresh_claims, TokenType::Refresh).unwrap();
    assert!(matches!(
        f.service.validate_token(&refresh_family).await,
        Err(AuthError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn sessionless_tokens_are_accepted() {
    let f = fixture();
    let alice = f.alice().await;
    let codec = f.service.codec();
    let claims = codec.claims_for(
        &alice,
        vec!["user".into()],
        None,
        TokenType::Access,
        Utc::now(),
        Duration::minutes(5),
    )
    .unwrap();
    let token = codec.issue(&claims, TokenType::Access).unwrap();
    assert_eq!(f.service.validate_token(&token).await.unwrap(), claims);
}

#[tokio::test]
async fn token_bound_to_someone_elses_session_is_rejected() {
    let f = fixture();
    f.alice().await;
    let bob = f
        .service
        .create_user("bob", "bob@example.com", PASSWORD, vec![])
        .await
        .unwrap();
    let alice_pair = f.login("alice").await;

    let codec = f.service.codec();
    let forged = codec.claims_for(
        &bob,
        vec![],
        Some(alice_pair.session_id),
        TokenType::Access,
        Utc::now(),
        Duration::minutes(5),
    )
    .unwrap();
    let token = codec.issue(&forged, TokenType::Access).unwrap();
    assert!(matches!(
        f.service.validate_token(&token).await,
        Err(AuthError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn change_password_ends_every_session() {
    let mut f = fixture();
    let alice = f.alice().await;
    let first = f.login("alice").await;
    let second = f.login("alice@example.com").await;

    assert!(matches!(
        f.service.change_password(alice.id, "wrong-old-pass", "newpass!").await,
        Err(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        f.service.change_password(alice.id, PASSWORD, "").await,
        Err(AuthError::BadRequest(_))
    ));
    assert!(matches!(
        f.service.change_password(alice.id, PASSWORD, "short").await,
        Err(AuthError::BadRequest(_))
    ));

    f.service
        .change_password(alice.id, PASSWORD, "newpass!")
        .await
        .unwrap();
    for pair in [&first, &second] {
        assert!(f.service.validate_token(&pair.access_token).await.is_err());
        assert!(f.service.refresh(&pair.refresh_token).await.is_err());
    }
    assert!(
        f.service
            .login("alice", "newpass!", ClientInfo::default())
            .await
            .is_ok()
    );
    assert!(f.drain_events().contains(&"user.password_changed"));
}

#[tokio::test]
async fn deactivation_ends_sessions_and_reactivation_allows_login() {
    let mut f = fixture();
    let alice = f.alice().await;
    let pair = f.login("alice").await;

    f.service.set_active(alice.id, false).await.unwrap();
    assert!(f.service.validate_token(&pair.access_token).await.is_err());
    f.service.set_active(alice.id, true).await.unwrap();
    f.login("alice").await;

    let events = f.drain_events();
    assert!(events.contains(&"user.deactivated"));
    assert!(events.contains(&"user.activated"));
}

#[tokio::test]
async fn cleanup_removes_only_expired_sessions() {
    let f = fixture();
    let alice = f.alice().await;
    let live = f.login("alice").await;
    let now = Utc::now();
    f.sessions
        .create(Session {
            id: uuidv7(),
            user_id: alice.id,
            refresh_token_hash: hash_refresh_token(&generate_refresh_token()),
            device: String::new(),
            remote_addr: String::new(),
            user_agent: String::new(),
            expires_at: now - Duration::seconds(1),
            created_at: now - Duration::hours(1),
            last_used_at: now - Duration::hours(1),
        })
        .await
        .unwrap();

    assert_eq!(f.service.cleanup_expired_sessions().await.unwrap(), 1);
    assert_eq!(f.service.cleanup_expired_sessions().await.unwrap(), 0);
    assert!(f.service.validate_token(&live.access_token).await.is_ok());
}

#[tokio::test]
async fn create_user_normalises_and_validates() {
    let f = fixture();
    let user = f
        .service
        .create_user(" Carol ", "CAROL@Example.com", PASSWORD, vec![])
        .await
        .unwrap();
    assert_eq!(user.username, "carol");
    assert_eq!(user.email, "carol@example.com");
    assert_eq!(user.roles, vec!["user"]);
    assert_ne!(user.password_hash, PASSWORD);
    assert_eq!(f.policy.roles_for_user(&user.id.to_string()), vec!["user"]);

    assert!(matches!(
        f.service.create_user("CAROL", "c2@example.com", PASSWORD, vec![]).await,
        Err(AuthError::Conflict(_))
    ));
    assert!(matches!(
        f.service.create_user("dave", "not-an-email", PASSWORD, vec![]).await,
        Err(AuthError::BadRequest(_))
    ));
    assert!(matches!(
        f.service.create_user("dave", "dave@example.com", "short", vec![]).await,
        Err(AuthError::BadRequest(_))
    ));
    assert!(matches!(
        f.service.create_user("", "dave@example.com", PASSWORD, vec![]).await,
        Err(AuthError::BadRequest(_))
    ));
    assert!(matches!(
        f.service
            .create_user("dave", "dave@example.com", PASSWORD, vec!["wizard".into()])
            .await,
        Err(AuthError::NotFound(_))
    ));
}

#[tokio::test]
async fn bootstrap_admin_only_on_empty_store() {
    let f = fixture();
    let admin = f
        .service
        .bootstrap_admin("root", "root@example.com", PASSWORD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(admin.roles, vec!["admin"]);
    assert!(f.policy.check_user(&admin.id.to_string(), "system", "admin"));

    let again = f
        .service
        .bootstrap_admin("root2", "root2@example.com", PASSWORD)
        .await
        .unwrap();
    assert!(again.is_none());
}

#[tokio::test]
async fn update_profile_normalises_and_keeps_uniqueness() {
    let f = fixture();
    let alice = f.alice().await;
    f.service
        .create_user("bob", "bob@example.com", PASSWORD, vec![])
        .await
        .unwrap();

    let updated = f
        .service
        .update_profile(alice.id, None, Some(" Alice@Media.Example "))
        .await
        .unwrap();
    assert_eq!(updated.email, "alice@media.example");
    assert_eq!(updated.username, "alice");

    assert!(matches!(
        f.service.update_profile(alice.id, Some("BOB"), None).await,
        Err(AuthError::Conflict(_))
    ));
    assert!(matches!(
        f.service.update_profile(alice.id, None, Some("nope")).await,
        Err(AuthError::BadRequest(_))
    ));
}

#[tokio::test]
async fn role_changes_reach_the_next_token() {
    let f = fixture();
    let alice = f.alice().await;
    f.service.assign_role(alice.id, "admin").await.unwrap();
    let pair = f.login("alice").await;
    let claims = f.service.validate_token(&pair.access_token).await.unwrap();
    assert_eq!(claims.roles, vec!["admin", "user"]);

    f.service.revoke_role(alice.id, "admin").await.unwrap();
    let refreshed = f.service.refresh(&pair.refresh_token).await.unwrap();
    let claims = f.service.validate_token(&refreshed.access_token).await.unwrap();
    assert_eq!(claims.roles, vec!["user"]);
    assert!(!f.policy.check_user(&alice.id.to_string(), "system", "admin"));

    assert!(matches!(
        f.service.assign_role(alice.id, "wizard").await,
        Err(AuthError::NotFound(_))
    ));
}

#[tokio::test]
async fn inherited_roles_appear_in_claims() {
    let f = fixture();
    f.policy
        .add_role(crate::rbac::Role::new("editor", "Edits metadata"))
        .unwrap();
    f.policy.add_parent("editor", "user").unwrap();
    let alice = f
        .service
        .create_user("alice", "alice@example.com", PASSWORD, vec!["editor".into()])
        .await
        .unwrap();
    let pair = f.login("alice").await;
    let claims = f.service.validate_token(&pair.access_token).await.unwrap();
    assert_eq!(claims.roles, vec!["editor", "user"]);
    assert_eq!(alice.roles, vec!["editor"]);
}

#[tokio::test]
async fn delete_user_cascades() {
    let f = fixture();
    let alice = f.alice().await;
    let pair = f.login("alice").await;

    f.service.delete_user(alice.id).await.unwrap();
    assert!(f.service.validate_token(&pair.access_token).await.is_err());
    assert!(f.service.get_user(alice.id).await.unwrap_err().is_not_found());
    assert!(f.policy.roles_for_user(&alice.id.to_string()).is_empty());
    assert!(f.service.delete_user(alice.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn delete_role_removes_persisted_grants() {
    let f = fixture();
    let alice = f.alice().await;
    f.service.assign_role(alice.id, "guest").await.unwrap();

    assert_eq!(f.service.delete_role("guest").await.unwrap(), 1);
    assert_eq!(f.users.get(alice.id).await.unwrap().roles, vec!["user"]);
    assert!(f.service.delete_role("guest").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn revoke_session_is_administrative() {
    let f = fixture();
    let alice = f.alice().await;
    let pair = f.login("alice").await;

    let revoked = f.service.revoke_session(pair.session_id).await.unwrap();
    assert_eq!(revoked.user_id, alice.id);
    assert!(f.service.validate_token(&pair.access_token).await.is_err());
    assert!(f.service.revoke_session(pair.session_id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn load_grants_hydrates_a_fresh_engine() {
    let f = fixture();
    let alice = f.alice().await;
    f.service.assign_role(alice.id, "guest").await.unwrap();

    let fresh = Arc::new(PolicyEngine::with_defaults());
    let service = AuthService::new(
        &config(),
        f.users.clone(),
        f.sessions.clone(),
        fresh.clone(),
        Arc::new(crate::auth::events::TracingPublisher),
    )
    .unwrap();
    assert_eq!(service.load_grants().await.unwrap(), 2);
    assert_eq!(fresh.roles_for_user(&alice.id.to_string()), vec!["guest", "user"]);
}

#[tokio::test]
async fn password_reset_never_reveals_accounts() {
    let mut f = fixture();
    f.alice().await;
    f.drain_events();

    f.service.request_password_reset("nobody@example.com").await.unwrap();
    f.service.request_password_reset("").await.unwrap();
    assert!(f.drain_events().is_empty());

    f.service.request_password_reset(" ALICE@example.com").await.unwrap();
    assert_eq!(f.drain_events(), vec!["user.password_reset_requested"]);
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let users = Arc::new(MemoryUserStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let mut cfg = config();
    cfg.refresh_secret = cfg.access_secret.clone();
    let result = AuthService::new(
        &cfg,
        users,
        sessions,
        Arc::new(PolicyEngine::with_defaults()),
        Arc::new(crate::auth::events::TracingPublisher),
    );
    assert!(matches!(result, Err(AuthError::BadRequest(_))));
}

#[tokio::test]
async fn failed_access_issue_rolls_back_the_session() {
    let mut f = fixture();
    f.alice().await;

    // Expiry before issuance: the codec refuses to sign.
    f.service.access_ttl = Duration::seconds(-1);
    let err = f
        .service
        .login("alice", PASSWORD, ClientInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::BadRequest(_)), "{err}");
    assert!(f.sessions.is_empty().await);

    f.service.access_ttl = Duration::MAX;
    let err = f
        .service
        .login("alice", PASSWORD, ClientInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Internal(_)), "{err}");
    assert!(f.sessions.is_empty().await);
    assert!(!f.drain_events().contains(&"user.logged_in"));
}

#[tokio::test]
async fn overflowing_session_expiry_is_an_error() {
    let mut f = fixture();
    f.alice().await;
    f.service.refresh_ttl = Duration::MAX;

    let err = f
        .service
        .login("alice", PASSWORD, ClientInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Internal(_)), "{err}");
    assert!(f.sessions.is_empty().await);
}
