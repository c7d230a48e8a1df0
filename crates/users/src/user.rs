use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use reserva_core::{Aggregate, AggregateRoot, DomainError, Role, UserId};
use reserva_events::Event;

// ─────────────────────────────────────────────────────────────────────────────
// User Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// User aggregate.
///
/// # Invariants
/// - At most one created user per stream (`BootstrapAdmin`/`RegisterUser`
///   require an empty stream).
/// - `UserLoggedIn` is state-preserving: the fold leaves the domain state
///   unchanged and only advances the version.
///
/// The stored `password_hash` is an opaque KDF output; hashing and
/// verification happen in the command builders, never in the decider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub version: u64,
    pub created: bool,
}

impl Default for User {
    fn default() -> Self {
        Self {
            user_id: UserId::new(),
            email: String::new(),
            password_hash: String::new(),
            role: Role::User,
            version: 0,
            created: false,
        }
    }
}

impl User {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Command: create the admin user from the bootstrap endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
    pub occurred_at_utc: DateTime<Utc>,
}

/// Command: self-service user registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterUser {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub occurred_at_utc: DateTime<Utc>,
}

/// Command: record a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginUser {
    pub email: String,
    pub occurred_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserCommand {
    BootstrapAdmin(BootstrapAdmin),
    RegisterUser(RegisterUser),
    LoginUser(LoginUser),
}

impl UserCommand {
    pub fn name(&self) -> &'static str {
        match self {
            UserCommand::BootstrapAdmin(_) => "BootstrapAdmin",
            UserCommand::RegisterUser(_) => "RegisterUser",
            UserCommand::LoginUser(_) => "LoginUser",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Event: the admin user was bootstrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminBootstrapped {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub occurred_at_utc: DateTime<Utc>,
}

/// Event: a user registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub occurred_at_utc: DateTime<Utc>,
}

/// Event: a user logged in. Folds as identity on domain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLoggedIn {
    pub user_id: UserId,
    pub email: String,
    pub occurred_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    AdminBootstrapped(AdminBootstrapped),
    UserRegistered(UserRegistered),
    UserLoggedIn(UserLoggedIn),
}

impl Event for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::AdminBootstrapped(_) => "AdminBootstrapped",
            UserEvent::UserRegistered(_) => "UserRegistered",
            UserEvent::UserLoggedIn(_) => "UserLoggedIn",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::AdminBootstrapped(e) => e.occurred_at_utc,
            UserEvent::UserRegistered(e) => e.occurred_at_utc,
            UserEvent::UserLoggedIn(e) => e.occurred_at_utc,
        }
    }

    fn payload(&self) -> serde_json::Result<JsonValue> {
        match self {
            UserEvent::AdminBootstrapped(e) => serde_json::to_value(e),
            UserEvent::UserRegistered(e) => serde_json::to_value(e),
            UserEvent::UserLoggedIn(e) => serde_json::to_value(e),
        }
    }

    fn decode(event_type: &str, payload: &JsonValue) -> Option<Self> {
        match event_type {
            "AdminBootstrapped" => serde_json::from_value(payload.clone())
                .ok()
                .map(UserEvent::AdminBootstrapped),
            "UserRegistered" => serde_json::from_value(payload.clone())
                .ok()
                .map(UserEvent::UserRegistered),
            "UserLoggedIn" => serde_json::from_value(payload.clone())
                .ok()
                .map(UserEvent::UserLoggedIn),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for User {
    type Command = UserCommand;
    type Event = UserEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UserEvent::AdminBootstrapped(e) => {
                self.user_id = e.user_id;
                self.email = e.email.clone();
                self.password_hash = e.password_hash.clone();
                self.role = e.role;
                self.created = true;
            }
            UserEvent::UserRegistered(e) => {
                self.user_id = e.user_id;
                self.email = e.email.clone();
                self.password_hash = e.password_hash.clone();
                self.role = e.role;
                self.created = true;
            }
            // State-preserving: login leaves the user unchanged.
            UserEvent::UserLoggedIn(_) => {}
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Self::Event, Self::Error> {
        match command {
            UserCommand::BootstrapAdmin(cmd) => self.handle_bootstrap(cmd),
            UserCommand::RegisterUser(cmd) => self.handle_register(cmd),
            UserCommand::LoginUser(cmd) => self.handle_login(cmd),
        }
    }
}

impl User {
    fn handle_bootstrap(&self, cmd: &BootstrapAdmin) -> Result<UserEvent, DomainError> {
        if self.created {
            return Err(DomainError::UserAlreadyExists);
        }

        Ok(UserEvent::AdminBootstrapped(AdminBootstrapped {
            user_id: cmd.user_id,
            email: cmd.email.clone(),
            password_hash: cmd.password_hash.clone(),
            role: Role::Admin,
            occurred_at_utc: cmd.occurred_at_utc,
        }))
    }

    fn handle_register(&self, cmd: &RegisterUser) -> Result<UserEvent, DomainError> {
        if self.created {
            return Err(DomainError::UserAlreadyExists);
        }

        Ok(UserEvent::UserRegistered(UserRegistered {
            user_id: cmd.user_id,
            email: cmd.email.clone(),
            password_hash: cmd.password_hash.clone(),
            role: cmd.role,
            occurred_at_utc: cmd.occurred_at_utc,
        }))
    }

    fn handle_login(&self, cmd: &LoginUser) -> Result<UserEvent, DomainError> {
        if !self.created {
            return Err(DomainError::InvalidCredentials);
        }
        if self.email != cmd.email {
            return Err(DomainError::InvalidCredentials);
        }

        Ok(UserEvent::UserLoggedIn(UserLoggedIn {
            user_id: self.user_id,
            email: self.email.clone(),
            occurred_at_utc: cmd.occurred_at_utc,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered_user() -> User {
        let user_id = UserId::new();
        let mut user = User::empty(user_id);
        let cmd = UserCommand::RegisterUser(RegisterUser {
            user_id,
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: Role::User,
            occurred_at_utc: now(),
        });
        let event = user.handle(&cmd).unwrap();
        user.apply(&event);
        user
    }

    #[test]
    fn bootstrap_emits_admin_bootstrapped_with_admin_role() {
        let user_id = UserId::new();
        let user = User::empty(user_id);

        let cmd = UserCommand::BootstrapAdmin(BootstrapAdmin {
            user_id,
            email: "admin@test.com".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            occurred_at_utc: now(),
        });

        let event = user.handle(&cmd).unwrap();
        let UserEvent::AdminBootstrapped(e) = &event else {
            panic!("expected AdminBootstrapped event");
        };
        assert_eq!(e.email, "admin@test.com");
        assert_eq!(e.role, Role::Admin);
    }

    #[test]
    fn bootstrap_rejects_existing_user() {
        let user = registered_user();
        let cmd = UserCommand::BootstrapAdmin(BootstrapAdmin {
            user_id: user.user_id,
            email: "admin@test.com".to_string(),
            password_hash: "h".to_string(),
            occurred_at_utc: now(),
        });

        let err = user.handle(&cmd).unwrap_err();
        assert_eq!(err, DomainError::UserAlreadyExists);
    }

    #[test]
    fn register_rejects_duplicate_registration() {
        let user = registered_user();
        let cmd = UserCommand::RegisterUser(RegisterUser {
            user_id: user.user_id,
            email: "alice@example.com".to_string(),
            password_hash: "h".to_string(),
            role: Role::User,
            occurred_at_utc: now(),
        });

        let err = user.handle(&cmd).unwrap_err();
        assert_eq!(err, DomainError::UserAlreadyExists);
    }

    #[test]
    fn login_succeeds_for_matching_email() {
        let user = registered_user();
        let cmd = UserCommand::LoginUser(LoginUser {
            email: "alice@example.com".to_string(),
            occurred_at_utc: now(),
        });

        let event = user.handle(&cmd).unwrap();
        let UserEvent::UserLoggedIn(e) = &event else {
            panic!("expected UserLoggedIn event");
        };
        assert_eq!(e.user_id, user.user_id);
    }

    #[test]
    fn login_rejects_missing_user_and_wrong_email() {
        let empty = User::empty(UserId::new());
        let cmd = UserCommand::LoginUser(LoginUser {
            email: "alice@example.com".to_string(),
            occurred_at_utc: now(),
        });
        assert_eq!(empty.handle(&cmd).unwrap_err(), DomainError::InvalidCredentials);

        let user = registered_user();
        let cmd = UserCommand::LoginUser(LoginUser {
            email: "bob@example.com".to_string(),
            occurred_at_utc: now(),
        });
        assert_eq!(user.handle(&cmd).unwrap_err(), DomainError::InvalidCredentials);
    }

    #[test]
    fn login_folds_as_identity_on_domain_state() {
        let mut user = registered_user();
        let before = (user.email.clone(), user.password_hash.clone(), user.role);
        let version_before = user.version;

        let cmd = UserCommand::LoginUser(LoginUser {
            email: "alice@example.com".to_string(),
            occurred_at_utc: now(),
        });
        let event = user.handle(&cmd).unwrap();
        user.apply(&event);

        assert_eq!(
            (user.email.clone(), user.password_hash.clone(), user.role),
            before
        );
        assert_eq!(user.version, version_before + 1);
    }

    #[test]
    fn payload_decode_roundtrips_and_unknown_tags_are_skipped() {
        let user = registered_user();
        let cmd = UserCommand::LoginUser(LoginUser {
            email: "alice@example.com".to_string(),
            occurred_at_utc: now(),
        });
        let event = user.handle(&cmd).unwrap();

        let payload = event.payload().unwrap();
        assert!(payload.get("userId").is_some());

        let decoded = UserEvent::decode(event.event_type(), &payload).unwrap();
        assert_eq!(decoded, event);

        assert!(UserEvent::decode("ConcurrencyConflictUnresolved", &payload).is_none());
    }
}
