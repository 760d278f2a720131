use std::sync::Arc;

use mockable::Clock;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::{hash_password, password_matches, SessionKeys};
use crate::engine::otp::{Issued, OtpProtocol};
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::user::{Role, User};
use crate::store::Store;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub role: Role,
    pub license_number: Option<String>,
    pub vehicle_details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

/// Sign-up, password login, passwordless login and password reset.
pub struct Accounts {
    store: Arc<dyn Store>,
    sessions: SessionKeys,
    login_codes: OtpProtocol,
    reset_codes: OtpProtocol,
    clock: Arc<dyn Clock>,
}

impl Accounts {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: SessionKeys,
        login_codes: OtpProtocol,
        reset_codes: OtpProtocol,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sessions,
            login_codes,
            reset_codes,
            clock,
        }
    }

    pub async fn register(&self, registration: Registration) -> Result<User, AppError> {
        let Registration {
            name,
            email,
            phone,
            password,
            role,
            license_number,
            vehicle_details,
        } = registration;

        let email = normalize_email(&email)?;
        if name.trim().is_empty() || phone.trim().is_empty() {
            return Err(AppError::Validation("name and phone are required".to_string()));
        }
        validate_password(&password)?;

        let user_id = Uuid::new_v4();
        let driver = match role {
            Role::Customer => None,
            Role::Driver => {
                let license = required(license_number, "license number")?;
                let vehicle = required(vehicle_details, "vehicle details")?;
                Some(Driver::new(user_id, license, vehicle))
            }
            Role::Admin => {
                return Err(AppError::Authorization(
                    "admin accounts cannot self-register".to_string(),
                ));
            }
        };

        let user = User {
            id: user_id,
            name: name.trim().to_string(),
            email,
            phone: phone.trim().to_string(),
            role,
            password_hash: hash_password(&password),
            driver_id: driver.as_ref().map(|d| d.id),
            created_at: self.clock.utc(),
        };

        let user = self.store.insert_user(user).await?;
        if let Some(driver) = driver {
            self.store.insert_driver(driver).await?;
        }

        info!(user_id = %user.id, role = user.role.as_str(), "account registered");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let user = self.user_by_email(email).await?;
        if !password_matches(password, &user.password_hash) {
            return Err(AppError::Unauthenticated("invalid credentials".to_string()));
        }
        self.session_for(user)
    }

    pub async fn request_login_code(&self, email: &str) -> Result<Issued, AppError> {
        let user = self.user_by_email(email).await?;
        Ok(self.login_codes.issue(&user.email, &user.email).await?)
    }

    pub async fn verify_login_code(&self, email: &str, code: &str) -> Result<Session, AppError> {
        require_code(code)?;
        let user = self.user_by_email(email).await?;
        self.login_codes.verify(&user.email, code).await?;
        info!(user_id = %user.id, "passwordless login");
        self.session_for(user)
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<Issued, AppError> {
        let user = self.user_by_email(email).await?;
        Ok(self.reset_codes.issue(&user.email, &user.email).await?)
    }

    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        require_code(code)?;
        validate_password(new_password)?;
        let user = self.user_by_email(email).await?;
        self.reset_codes.verify(&user.email, code).await?;
        self.store
            .set_password_hash(user.id, hash_password(new_password))
            .await?;
        info!(user_id = %user.id, "password reset");
        Ok(())
    }

    async fn user_by_email(&self, email: &str) -> Result<User, AppError> {
        let email = normalize_email(email)?;
        self.store
            .user_by_email(&email)
            .await?
            .ok_or_else(|| AppError::NotFound("no account found with this email".to_string()))
    }

    fn session_for(&self, user: User) -> Result<Session, AppError> {
        let token = self.sessions.issue(user.id, user.role)?;
        Ok(Session { token, user })
    }
}

fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    Ok(email)
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    Ok(())
}

fn require_code(code: &str) -> Result<(), AppError> {
    if code.trim().is_empty() {
        return Err(AppError::Validation("OTP is required".to_string()));
    }
    Ok(())
}

fn required(value: Option<String>, what: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{what} is required for drivers")))
}
