use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{missing_field, reply_object};
use crate::config::{Avatar, Configuration};
use crate::error::Error;
use crate::request::{ApiResponse, Endpoint, ExpectedShape, RequestDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub user_id: String,
    pub display_name: String,
    pub last_login: Option<DateTime<Utc>>,
    pub avatar: Option<Avatar>,
}

/// `GET /user`, available since News 6.0.5
#[derive(Debug, Clone, Copy, Default)]
pub struct GetUser;

impl Endpoint for GetUser {
    type Output = UserInfo;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::get("/user").expect(ExpectedShape::Object)
    }

    fn check_output(&mut self, response: &ApiResponse) -> Result<UserInfo, Error> {
        let reply = reply_object(response)?;

        let display_name = reply
            .get("displayName")
            .ok_or_else(|| missing_field("Can not find the user's display name in the server reply."))?
            .as_str()
            .unwrap_or_default()
            .to_string();

        // "avatar" is null when the user has none
        let avatar = reply
            .get("avatar")
            .filter(|a| !a.is_null())
            .and_then(|a| serde_json::from_value::<Avatar>(a.clone()).ok());

        Ok(UserInfo {
            user_id: reply
                .get("userId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            display_name,
            last_login: reply
                .get("lastLoginTimestamp")
                .and_then(Value::as_i64)
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            avatar,
        })
    }

    fn on_success(&mut self, user: &UserInfo, configuration: &dyn Configuration) {
        debug!(display_name = %user.display_name, "Received user information");
        configuration.set_display_name(&user.display_name);
        configuration.set_avatar(user.avatar.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Account;
    use crate::error::ErrorKind;
    use bytes::Bytes;
    use serde_json::json;

    fn response(json: Value) -> ApiResponse {
        ApiResponse {
            status: 200,
            body: Bytes::from(json.to_string()),
            json: Some(json),
        }
    }

    #[test]
    fn test_user_is_stored() {
        let account = Account::new();
        let reply = response(json!({
            "userId": "john",
            "displayName": "John Doe",
            "lastLoginTimestamp": 1241231233,
            "avatar": {"data": "aGVsbG8=", "mime": "image/jpeg"}
        }));

        let mut endpoint = GetUser;
        let user = endpoint.check_output(&reply).unwrap();
        endpoint.on_success(&user, &account);

        assert_eq!(user.user_id, "john");
        assert_eq!(user.last_login.map(|t| t.timestamp()), Some(1241231233));
        assert_eq!(account.display_name().as_deref(), Some("John Doe"));
        assert_eq!(account.avatar().map(|a| a.mime), Some("image/jpeg".to_string()));
    }

    #[test]
    fn test_null_avatar() {
        let account = Account::new();
        let reply = response(json!({"displayName": "Jane", "avatar": null}));

        let mut endpoint = GetUser;
        let user = endpoint.check_output(&reply).unwrap();
        endpoint.on_success(&user, &account);

        assert!(user.avatar.is_none());
        assert!(account.avatar().is_none());
    }

    #[test]
    fn test_missing_display_name() {
        let err = GetUser
            .check_output(&response(json!({"userId": "john"})))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Output);
        assert_eq!(err.message(), "Can not find the user's display name in the server reply.");
    }
}
