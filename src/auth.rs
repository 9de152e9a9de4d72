use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared-password gate in front of the wire surface. Identity (role,
/// department) comes from the provisioned profile matching the connection's
/// `user` parameter, not from here.
#[derive(Debug)]
pub struct AulaAuthSource {
    password: String,
}

impl AulaAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for AulaAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
