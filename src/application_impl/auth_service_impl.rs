use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
}

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Cheaper parameters for development backends and tests.
    pub fn with_cost(m_cost_kib: u32, t_cost: u32) -> Result<Self, AuthError> {
        let params = argon2::Params::new(m_cost_kib, t_cost, 1, None)
            .map_err(|e| AuthError::InternalError(format!("argon2 params: {}", e)))?;
        Ok(Self {
            argon2: Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params),
        })
    }
}

impl Default for Argon2PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialHasher for Argon2PasswordHasher {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = argon2::password_hash::SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::InternalError(e.to_string()))?
            .to_string();
        Ok(hash)
    }

    async fn verify_password(
        &self,
        password: &str,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(password_hash)
            .map_err(|e| AuthError::InternalError(format!("invalid PHC hash: {}", e)))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::InternalError(format!("verify error: {}", e))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub signing_key: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String, // user id as string
    exp: i64,
    iat: i64,
    iss: String,
    aud: String,
    jti: String,
    typ: String, // "access" or "refresh"
}

const ACCESS_TYP: &str = "access";
const REFRESH_TYP: &str = "refresh";

fn encode_claims(
    uid: UserId,
    jti: String,
    typ: &str,
    ttl: Duration,
    cfg: &JwtConfig,
) -> Result<(String, DateTime<Utc>), AuthError> {
    let iat_dt = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| AuthError::InternalError(e.to_string()))?;
    let exp_dt = iat_dt + ttl;
    let claims = Claims {
        sub: uid.0.to_string(),
        exp: exp_dt.timestamp(),
        iat: iat_dt.timestamp(),
        iss: cfg.issuer.clone(),
        aud: cfg.audience.clone(),
        jti,
        typ: typ.to_string(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&cfg.signing_key),
    )
    .map_err(|e| AuthError::InternalError(e.to_string()))?;
    Ok((token, exp_dt))
}

fn decode_claims(token: &str, typ: &str, cfg: &JwtConfig) -> Result<Claims, AuthError> {
    let mut v = Validation::new(Algorithm::HS256);
    v.validate_exp = true;
    v.leeway = 0;
    v.set_audience(&[cfg.audience.clone()]);
    v.set_issuer(&[cfg.issuer.clone()]);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(&cfg.signing_key), &v)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::TokenInvalid,
        })?;
    if data.claims.typ != typ {
        return Err(AuthError::TokenInvalid);
    }
    Ok(data.claims)
}

pub struct JwtHs256Codec {
    cfg: JwtConfig,
}

impl JwtHs256Codec {
    pub fn new(cfg: JwtConfig) -> Self {
        JwtHs256Codec { cfg }
    }

    #[inline]
    fn gen_jti() -> String {
        Uuid::new_v4().to_string()
    }

    #[inline]
    fn parse_user_id(sub: &str) -> Result<UserId, AuthError> {
        sub.parse::<UserId>().map_err(|_| AuthError::TokenInvalid)
    }
}

#[async_trait::async_trait]
impl TokenCodec for JwtHs256Codec {
    async fn issue_access_token(
        &self,
        user: UserId,
        jti: Option<String>,
    ) -> Result<(AccessToken, DateTime<Utc>), AuthError> {
        let jti = jti.unwrap_or_else(Self::gen_jti);
        let (token, exp_dt) = encode_claims(user, jti, ACCESS_TYP, self.cfg.access_ttl, &self.cfg)?;
        Ok((AccessToken(token), exp_dt))
    }

    async fn issue_refresh_token(
        &self,
        user: UserId,
        jti: String,
    ) -> Result<(RefreshHandle, DateTime<Utc>), AuthError> {
        let (token, exp_dt) =
            encode_claims(user, jti, REFRESH_TYP, self.cfg.refresh_ttl, &self.cfg)?;
        Ok((RefreshHandle(token), exp_dt))
    }

    async fn verify_access_token(
        &self,
        token: &AccessToken,
    ) -> Result<TokenVerifyResult, AuthError> {
        let claims = decode_claims(token.as_str(), ACCESS_TYP, &self.cfg)?;
        let user_id = Self::parse_user_id(&claims.sub)?;
        Ok(TokenVerifyResult {
            user_id,
            jti: Some(claims.jti),
        })
    }

    async fn verify_refresh_token(
        &self,
        token: &RefreshHandle,
    ) -> Result<TokenVerifyResult, AuthError> {
        let claims = decode_claims(token.as_str(), REFRESH_TYP, &self.cfg)?;
        let user_id = Self::parse_user_id(&claims.sub)?;
        Ok(TokenVerifyResult {
            user_id,
            jti: Some(claims.jti),
        })
    }
}

pub struct RealAuthService {
    user_repo: Arc<dyn UserRepo>,
    credential_hasher: Arc<dyn CredentialHasher>,
    token_codec: Arc<dyn TokenCodec>,
    session_store: Arc<dyn AuthSessionStore>,
    min_username_len: usize,
    min_password_len: usize,
}

impl RealAuthService {
    pub fn new(
        user_repo: Arc<dyn UserRepo>,
        credential_hasher: Arc<dyn CredentialHasher>,
        token_codec: Arc<dyn TokenCodec>,
        session_store: Arc<dyn AuthSessionStore>,
    ) -> Self {
        Self {
            user_repo,
            credential_hasher,
            token_codec,
            session_store,
            min_username_len: 3,
            min_password_len: 6,
        }
    }

    fn validate_signup(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if username.len() < self.min_username_len {
            return Err(AuthError::Validation("username too short".to_string()));
        }
        self.validate_password(password)
    }

    fn validate_password(&self, password: &str) -> Result<(), AuthError> {
        if password.len() < self.min_password_len {
            return Err(AuthError::Validation("password too short".to_string()));
        }
        Ok(())
    }

    #[inline]
    fn new_user_id() -> UserId {
        UserId(Uuid::new_v4())
    }

    #[inline]
    fn new_jti() -> String {
        Uuid::new_v4().to_string()
    }

    async fn active_user(&self, user_id: UserId) -> Result<UserRecord, AuthError> {
        let rec = self
            .user_repo
            .get_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !rec.is_active {
            return Err(AuthError::AccountDisabled);
        }
        Ok(rec)
    }

    /// Issue a fresh access/refresh pair sharing one JTI and register the JTI.
    async fn issue_session(&self, rec: &UserRecord) -> Result<LoginResult, AuthError> {
        let jti = Self::new_jti();

        let (access_token, access_exp) = self
            .token_codec
            .issue_access_token(rec.user_id, Some(jti.clone()))
            .await?;
        let (refresh_token, refresh_exp) = self
            .token_codec
            .issue_refresh_token(rec.user_id, jti.clone())
            .await?;

        self.session_store
            .save_refresh_jti(rec.user_id, &jti, refresh_exp)
            .await?;

        Ok(LoginResult {
            user: rec.profile(),
            tokens: AuthTokens {
                access_token,
                refresh_token,
                access_token_expires_at: access_exp,
                refresh_token_expires_at: refresh_exp,
            },
        })
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn signup(&self, request: RegistrationProfile) -> Result<LoginResult, AuthError> {
        let RegistrationProfile {
            username,
            password,
            display_name,
            email,
        } = request;

        self.validate_signup(&username, &password)?;

        if self.user_repo.get_by_username(&username).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        let password_hash = self.credential_hasher.hash_password(&password).await?;
        let rec = UserRecord {
            user_id: Self::new_user_id(),
            display_name: display_name.unwrap_or_else(|| username.clone()),
            username,
            email,
            password_hash,
            is_active: true,
            created_at: Utc::now(),
        };
        self.user_repo.create(rec.clone()).await?;
        info!(user_id = %rec.user_id, "user registered");

        self.issue_session(&rec).await
    }

    async fn login(&self, request: LoginCredentials) -> Result<LoginResult, AuthError> {
        let LoginCredentials { username, password } = request;

        let rec = self
            .user_repo
            .get_by_username(&username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let ok = self
            .credential_hasher
            .verify_password(&password, &rec.password_hash)
            .await?;
        if !ok {
            return Err(AuthError::InvalidCredentials);
        }

        if !rec.is_active {
            return Err(AuthError::AccountDisabled);
        }

        self.issue_session(&rec).await
    }

    async fn verify_token(&self, token: &str) -> Result<UserId, AuthError> {
        let verify_result = self
            .token_codec
            .verify_access_token(&AccessToken(token.to_string()))
            .await?;

        self.active_user(verify_result.user_id).await?;
        Ok(verify_result.user_id)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<LoginResult, AuthError> {
        let verify_result = self
            .token_codec
            .verify_refresh_token(&RefreshHandle(refresh_token.to_string()))
            .await
            .map_err(|_| AuthError::RefreshTokenInvalid)?;

        let user_id = verify_result.user_id;
        let jti = verify_result.jti.ok_or(AuthError::RefreshTokenInvalid)?;

        // Rotation: check-and-consume
        match self.session_store.check_refresh_jti(&jti, true).await? {
            Some(found_user_id) if found_user_id == user_id => {}
            _ => return Err(AuthError::RefreshTokenInvalid),
        }

        let rec = self.active_user(user_id).await?;
        debug!(user_id = %user_id, "refresh token rotated");
        self.issue_session(&rec).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let handle = RefreshHandle(refresh_token.to_string());
        match self.token_codec.verify_refresh_token(&handle).await {
            Ok(TokenVerifyResult { jti: Some(jti), .. }) => {
                self.session_store.revoke_refresh_jti(&jti).await
            }
            Ok(_) | Err(AuthError::TokenExpired) | Err(AuthError::TokenInvalid) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn logout_all(&self, user_id: UserId) -> Result<(), AuthError> {
        let revoked = self.session_store.revoke_all_for_user(user_id).await?;
        info!(user_id = %user_id, revoked, "all sessions revoked");
        Ok(())
    }

    async fn current_user(&self, user_id: UserId) -> Result<UserProfile, AuthError> {
        Ok(self.active_user(user_id).await?.profile())
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> Result<UserProfile, AuthError> {
        if let Some(display_name) = &update.display_name {
            if display_name.trim().is_empty() {
                return Err(AuthError::Validation("display name is empty".to_string()));
            }
        }
        if let Some(email) = &update.email {
            if !email.contains('@') {
                return Err(AuthError::Validation("email is malformed".to_string()));
            }
        }
        self.active_user(user_id).await?;
        let rec = self.user_repo.update_profile(user_id, &update).await?;
        Ok(rec.profile())
    }

    async fn change_password(
        &self,
        user_id: UserId,
        change: PasswordChange,
    ) -> Result<(), AuthError> {
        let rec = self.active_user(user_id).await?;
        let ok = self
            .credential_hasher
            .verify_password(&change.current_password, &rec.password_hash)
            .await?;
        if !ok {
            return Err(AuthError::InvalidCredentials);
        }
        self.validate_password(&change.new_password)?;

        let password_hash = self
            .credential_hasher
            .hash_password(&change.new_password)
            .await?;
        self.user_repo
            .update_password_hash(user_id, &password_hash)
            .await?;
        let revoked = self.session_store.revoke_all_for_user(user_id).await?;
        info!(user_id = %user_id, revoked, "password changed, sessions revoked");
        Ok(())
    }
}
