// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::collections::HashSet;

use tracing::debug;

use super::ActivityType;
use crate::config::FederationConfig;

/// Decides whether a Follow or InviteWitness request is accepted.
/// A request type without a list accepts everyone. Announcements are only
/// accepted from listed actors; followed nodes are checked by the inbox.
#[derive(Debug, Clone, Default)]
pub struct AcceptListAuthorizer {
    follow: Option<HashSet<String>>,
    invite_witness: Option<HashSet<String>>,
    announce: HashSet<String>,
}

impl AcceptListAuthorizer {
    /// Accept every request
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn new(follow: Option<Vec<String>>, invite_witness: Option<Vec<String>>) -> Self {
        Self {
            follow: follow.map(|list| list.into_iter().collect()),
            invite_witness: invite_witness.map(|list| list.into_iter().collect()),
            announce: HashSet::new(),
        }
    }

    /// Index announcements from these actors even when not following them
    pub fn with_announce_list(mut self, actors: Vec<String>) -> Self {
        self.announce = actors.into_iter().collect();
        self
    }

    pub fn from_config(config: &FederationConfig) -> Self {
        Self::new(
            config.follow_accept_list.clone(),
            config.invite_witness_accept_list.clone(),
        )
        .with_announce_list(config.announce_accept_list.clone())
    }

    pub fn authorize(&self, activity_type: ActivityType, actor: &str) -> bool {
        let list = match activity_type {
            ActivityType::Follow => &self.follow,
            ActivityType::InviteWitness => &self.invite_witness,
            ActivityType::Announce => return self.announce.contains(actor),
            _ => return true,
        };

        let allowed = list.as_ref().map_or(true, |actors| actors.contains(actor));
        if !allowed {
            debug!("{} from {} is not on the accept list", activity_type, actor);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_apply_per_request_type() {
        let auth = AcceptListAuthorizer::new(Some(vec!["https://a".to_string()]), None);

        assert!(auth.authorize(ActivityType::Follow, "https://a"));
        assert!(!auth.authorize(ActivityType::Follow, "https://b"));
        assert!(auth.authorize(ActivityType::InviteWitness, "https://b"));
    }

    #[test]
    fn test_announcements_need_a_listing() {
        let auth = AcceptListAuthorizer::accept_all().with_announce_list(vec!["https://hub".to_string()]);

        assert!(auth.authorize(ActivityType::Announce, "https://hub"));
        assert!(!auth.authorize(ActivityType::Announce, "https://stranger"));
        assert!(!AcceptListAuthorizer::accept_all().authorize(ActivityType::Announce, "https://hub"));
    }

    #[test]
    fn test_empty_list_rejects_everyone() {
        let auth = AcceptListAuthorizer::new(None, Some(Vec::new()));
        assert!(!auth.authorize(ActivityType::InviteWitness, "https://a"));
        assert!(AcceptListAuthorizer::accept_all().authorize(ActivityType::InviteWitness, "https://a"));
    }
}
