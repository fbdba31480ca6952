use std::{
    collections::HashSet,
    fmt,
    path::Path,
    sync::Arc,
};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Identity, PermissionGate};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgement {
    Allow,
    Deny,
}

/// User and group ids may be written as numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl RecordId {
    fn is_blank(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigninUser {
    pub uid: RecordId,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigninGroup {
    pub gid: RecordId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRule {
    pub groups: Vec<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub cmds: Vec<String>,
    pub rule: Judgement,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRules {
    pub policy: Judgement,
    pub rules: Vec<CommandRule>,
}

/// Parsed signin file: users, the group hierarchy and the ordered command rules.
///
/// Rule groups are stored already expanded with every descendant group.
#[derive(Debug, Clone, Deserialize)]
pub struct SigninFile {
    pub users: Vec<SigninUser>,
    pub groups: Vec<SigninGroup>,
    pub cmdrule: CommandRules,
}

impl SigninFile {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.is_file() {
            return Err(AppError::Validation(format!(
                "signin_file is not found. ({})",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, AppError> {
        let mut file: SigninFile = serde_yaml::from_str(raw)
            .map_err(|e| AppError::Validation(format!("signin_file format error. {e}")))?;
        file.check_structure()?;

        let groups = file.groups.clone();
        for rule in &mut file.cmdrule.rules {
            rule.groups = expand_groups(&rule.groups, &groups);
        }
        Ok(file)
    }

    fn check_structure(&self) -> Result<(), AppError> {
        let group_names: HashSet<&str> = self.groups.iter().map(|g| g.name.as_str()).collect();

        let mut gids = HashSet::new();
        for group in &self.groups {
            if group.gid.is_blank() {
                return Err(format_error("\"gid\" not found or empty."));
            }
            if !gids.insert(&group.gid) {
                return Err(format_error(&format!("Duplicate gid found. gid={}", group.gid)));
            }
            if group.name.trim().is_empty() {
                return Err(format_error("\"name\" not found or empty in \"groups\"."));
            }
            if let Some(parent) = &group.parent {
                if !group_names.contains(parent.as_str()) {
                    return Err(format_error(&format!(
                        "Parent group not found. parent={parent}"
                    )));
                }
            }
        }

        let mut uids = HashSet::new();
        for user in &self.users {
            if user.uid.is_blank() {
                return Err(format_error("\"uid\" not found or empty."));
            }
            if !uids.insert(&user.uid) {
                return Err(format_error(&format!("Duplicate uid found. uid={}", user.uid)));
            }
            if user.name.trim().is_empty() {
                return Err(format_error("\"name\" not found or empty in \"users\"."));
            }
            if let Some(missing) = user
                .groups
                .iter()
                .find(|g| !group_names.contains(g.as_str()))
            {
                return Err(format_error(&format!("Group not found. {missing}")));
            }
        }

        Ok(())
    }

    pub fn user(&self, user_name: &str) -> Option<&SigninUser> {
        self.users.iter().find(|user| user.name == user_name)
    }

    /// Builds the identity for a known user, sharing this signin record.
    pub fn identity_for(self: &Arc<Self>, user_name: &str) -> Option<Identity> {
        self.user(user_name).map(|user| Identity {
            user_name: user.name.clone(),
            groups: user.groups.clone(),
            signin: Arc::clone(self),
        })
    }

    /// Evaluates the command rules for a caller in `user_groups`.
    ///
    /// Rules that share no group with the caller are ignored. A rule naming a mode
    /// applies only when both the mode and one of its commands match. The last
    /// applicable rule decides; with none, the policy does.
    pub fn is_allowed(&self, user_groups: &[String], mode: &str, cmd: &str) -> bool {
        let mut judgement = self.cmdrule.policy;
        for rule in &self.cmdrule.rules {
            if !rule.groups.iter().any(|g| user_groups.contains(g)) {
                continue;
            }
            if let Some(rule_mode) = &rule.mode {
                if rule_mode != mode || !rule.cmds.iter().any(|c| c == cmd) {
                    continue;
                }
            }
            judgement = rule.rule;
        }
        debug!(mode, cmd, ?judgement, "command rule evaluated");
        judgement == Judgement::Allow
    }
}

impl PermissionGate for SigninFile {
    fn validate(
        &self,
        identity: &Identity,
        groups: &[String],
        mode: &str,
        cmd: &str,
        _options: &Map<String, Value>,
    ) -> bool {
        let allowed = self.is_allowed(groups, mode, cmd);
        if !allowed {
            debug!(user = %identity.user_name, mode, cmd, "command denied");
        }
        allowed
    }
}

fn format_error(detail: &str) -> AppError {
    AppError::Validation(format!("signin_file format error. {detail}"))
}

/// Returns `names` followed by every group that descends from one of them.
fn expand_groups(names: &[String], groups: &[SigninGroup]) -> Vec<String> {
    let mut expanded: Vec<String> = Vec::new();
    let mut pending: Vec<String> = names.to_vec();
    while let Some(name) = pending.pop() {
        if expanded.contains(&name) {
            continue;
        }
        pending.extend(
            groups
                .iter()
                .filter(|g| g.parent.as_deref() == Some(name.as_str()))
                .map(|g| g.name.clone()),
        );
        expanded.push(name);
    }
    expanded
}
