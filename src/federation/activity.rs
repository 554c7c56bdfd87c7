// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anchor::ContentHash;
use crate::witness::WitnessProof;

/// Activity types exchanged between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    /// Request to witness an anchor
    Offer,
    /// Positive reply to an offer or request
    Accept,
    /// Negative reply to an offer or request
    Reject,
    /// Subscribe to a node's anchors
    Follow,
    /// Ask a node to act as a batch witness
    InviteWitness,
    /// Publish a completed anchor to followers
    Announce,
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityType::Offer => write!(f, "Offer"),
            ActivityType::Accept => write!(f, "Accept"),
            ActivityType::Reject => write!(f, "Reject"),
            ActivityType::Follow => write!(f, "Follow"),
            ActivityType::InviteWitness => write!(f, "InviteWitness"),
            ActivityType::Announce => write!(f, "Announce"),
        }
    }
}

/// What an activity is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityObject {
    /// An anchor and the node that can serve it
    Anchor { anchor_id: ContentHash, origin: String },
    /// A witness proof, carried by an Accept of an Offer
    Proof { proof: WitnessProof },
    /// Another actor
    Actor { id: String },
    /// An earlier request being answered
    Request {
        activity_id: String,
        activity_type: ActivityType,
        actor: String,
    },
}

/// One federation activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// Sending node
    pub actor: String,
    /// Recipients
    pub to: Vec<String>,
    pub published: DateTime<Utc>,
    pub object: ActivityObject,
    /// Activity this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    /// After this time the activity must not be acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Activity {
    fn new(activity_type: ActivityType, actor: &str, to: Vec<String>, object: ActivityObject, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}/activities/{}", actor, Uuid::new_v4()),
            activity_type,
            actor: actor.to_string(),
            to,
            published: now,
            object,
            in_reply_to: None,
            expires: None,
            summary: None,
        }
    }

    /// Ask `witness` to sign an anchor before `expires`
    pub fn offer(
        actor: &str,
        witness: &str,
        anchor_id: &ContentHash,
        origin: &str,
        now: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> Self {
        let mut offer = Self::new(
            ActivityType::Offer,
            actor,
            vec![witness.to_string()],
            ActivityObject::Anchor {
                anchor_id: anchor_id.clone(),
                origin: origin.to_string(),
            },
            now,
        );
        offer.expires = Some(expires);
        offer
    }

    /// Accept `request` with `object` as the result
    pub fn accept(actor: &str, request: &Activity, object: ActivityObject, now: DateTime<Utc>) -> Self {
        let mut accept = Self::new(ActivityType::Accept, actor, vec![request.actor.clone()], object, now);
        accept.in_reply_to = Some(request.id.clone());
        accept
    }

    /// Reject `request`, echoing what was rejected
    pub fn reject(actor: &str, request: &Activity, reason: &str, now: DateTime<Utc>) -> Self {
        let object = match &request.object {
            ActivityObject::Anchor { .. } => request.object.clone(),
            _ => request.as_request(),
        };
        let mut reject = Self::new(ActivityType::Reject, actor, vec![request.actor.clone()], object, now);
        reject.in_reply_to = Some(request.id.clone());
        reject.summary = Some(reason.to_string());
        reject
    }

    pub fn follow(actor: &str, target: &str, now: DateTime<Utc>) -> Self {
        Self::new(
            ActivityType::Follow,
            actor,
            vec![target.to_string()],
            ActivityObject::Actor { id: target.to_string() },
            now,
        )
    }

    pub fn invite_witness(actor: &str, target: &str, now: DateTime<Utc>) -> Self {
        Self::new(
            ActivityType::InviteWitness,
            actor,
            vec![target.to_string()],
            ActivityObject::Actor { id: target.to_string() },
            now,
        )
    }

    /// Publish a completed anchor
    pub fn announce(actor: &str, to: Vec<String>, anchor_id: &ContentHash, origin: &str, now: DateTime<Utc>) -> Self {
        Self::new(
            ActivityType::Announce,
            actor,
            to,
            ActivityObject::Anchor {
                anchor_id: anchor_id.clone(),
                origin: origin.to_string(),
            },
            now,
        )
    }

    /// This activity as the object of a reply
    pub fn as_request(&self) -> ActivityObject {
        ActivityObject::Request {
            activity_id: self.id.clone(),
            activity_type: self.activity_type,
            actor: self.actor.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(false, |expires| now >= expires)
    }
}
