use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Connection-level password shared by every client of the wire surface.
/// Staff accounts authenticate separately through the `login` table.
#[derive(Debug)]
pub struct InnkeepAuthSource {
    password: String,
}

impl InnkeepAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for InnkeepAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = ?login.user(), "wire login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
