use serde::{Deserialize, Serialize};

/// Profile of the signed-in user as returned by `GetCurrentUser`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "realName")]
    pub realname: Option<String>,
    #[serde(default, alias = "nickName")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, alias = "home_path")]
    pub home_path: Option<String>,
    #[serde(default, alias = "tenant_id")]
    pub tenant_id: Option<u64>,
}

impl UserInfo {
    /// Best human-readable name: real name, then nickname, then username.
    pub fn display_name(&self) -> &str {
        [&self.realname, &self.nickname, &self.username]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }

    pub fn is_tenant_user(&self) -> bool {
        self.tenant_id.is_some_and(|id| id > 0)
    }
}

/// Reply of `GetGrantedCodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrantedCodes {
    #[serde(default)]
    pub codes: Vec<String>,
}
