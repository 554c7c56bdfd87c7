// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{AcceptListAuthorizer, Activity, ActivityObject, ActivityType, FederationError, Outbox, PeerStore};
use crate::anchor::ContentHash;
use crate::broker::{BrokerError, Message, MessageHandler};
use crate::clock::Clock;
use crate::observer::{ObserveOutcome, Observer};
use crate::status::AnchorStatusStore;
use crate::witness::LocalWitness;
use crate::writer::{AnchorWriter, ProofDisposition};

/// What the inbox did with an activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    /// A reply of this type was sent
    Replied(ActivityType),
    /// A witness proof was passed to the writer
    Proof(ProofDisposition),
    /// An announced anchor was passed to the observer
    Observed(ObserveOutcome),
    /// State was updated, no reply needed
    Recorded,
    Ignored(String),
}

/// Handles activities delivered to this node
pub struct Inbox {
    node_id: String,
    writer: Arc<AnchorWriter>,
    observer: Arc<Observer>,
    status: Arc<AnchorStatusStore>,
    peers: Arc<PeerStore>,
    authorizer: AcceptListAuthorizer,
    outbox: Arc<dyn Outbox>,
    clock: Arc<dyn Clock>,
    witness: Option<Arc<LocalWitness>>,
}

impl Inbox {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: &str,
        writer: Arc<AnchorWriter>,
        observer: Arc<Observer>,
        status: Arc<AnchorStatusStore>,
        peers: Arc<PeerStore>,
        authorizer: AcceptListAuthorizer,
        outbox: Arc<dyn Outbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            writer,
            observer,
            status,
            peers,
            authorizer,
            outbox,
            clock,
            witness: None,
        }
    }

    /// Sign offers from other nodes with this key
    pub fn with_witness(mut self, witness: Arc<LocalWitness>) -> Self {
        self.witness = Some(witness);
        self
    }

    async fn reply(&self, reply: Activity) -> Result<InboxOutcome, FederationError> {
        let reply_type = reply.activity_type;
        self.outbox.send(&reply).await?;
        Ok(InboxOutcome::Replied(reply_type))
    }

    async fn reject(&self, request: &Activity, reason: &str) -> Result<InboxOutcome, FederationError> {
        info!("Rejecting {} {} from {}: {}", request.activity_type, request.id, request.actor, reason);
        self.reply(Activity::reject(&self.node_id, request, reason, self.clock.now()))
            .await
    }

    fn anchor_of(activity: &Activity) -> Result<(&ContentHash, &str), FederationError> {
        match &activity.object {
            ActivityObject::Anchor { anchor_id, origin } => Ok((anchor_id, origin)),
            _ => Err(FederationError::Invalid(format!(
                "{} {} does not carry an anchor",
                activity.activity_type, activity.id
            ))),
        }
    }

    /// Handle one activity. Every handler tolerates redelivery.
    pub async fn handle(&self, activity: &Activity) -> Result<InboxOutcome, FederationError> {
        debug!("Inbox: {} {} from {}", activity.activity_type, activity.id, activity.actor);

        match activity.activity_type {
            ActivityType::Offer => self.handle_offer(activity).await,
            ActivityType::Accept => self.handle_accept(activity).await,
            ActivityType::Reject => self.handle_reject(activity).await,
            ActivityType::Announce => {
                let (anchor_id, origin) = Self::anchor_of(activity)?;
                let trusted = self.peers.is_following(&activity.actor).await?
                    || self.authorizer.authorize(ActivityType::Announce, &activity.actor);
                if !trusted {
                    debug!("Ignoring announce of {} from unfollowed {}", anchor_id, activity.actor);
                    return Ok(InboxOutcome::Ignored(format!("not following {}", activity.actor)));
                }
                let outcome = self.observer.observe(anchor_id, Some(origin)).await?;
                Ok(InboxOutcome::Observed(outcome))
            }
            ActivityType::Follow => {
                if !self.authorizer.authorize(ActivityType::Follow, &activity.actor) {
                    return self.reject(activity, "follow request not authorized").await;
                }
                self.peers.add_follower(&activity.actor).await?;
                let accept = Activity::accept(&self.node_id, activity, activity.as_request(), self.clock.now());
                self.reply(accept).await
            }
            ActivityType::InviteWitness => {
                if !self.authorizer.authorize(ActivityType::InviteWitness, &activity.actor) {
                    return self.reject(activity, "witness invitation not authorized").await;
                }
                self.peers.add_witnessing(&activity.actor).await?;
                let accept = Activity::accept(&self.node_id, activity, activity.as_request(), self.clock.now());
                self.reply(accept).await
            }
        }
    }

    /// Witness role: sign the anchor and return the proof
    async fn handle_offer(&self, offer: &Activity) -> Result<InboxOutcome, FederationError> {
        let (anchor_id, _) = Self::anchor_of(offer)?;

        if offer.is_expired(self.clock.now()) {
            return self.reject(offer, "offer expired").await;
        }

        let authorized = self.peers.is_witnessing(&offer.actor).await?
            || self.authorizer.authorize(ActivityType::InviteWitness, &offer.actor);
        if !authorized {
            return self.reject(offer, "not a witness for this actor").await;
        }

        let witness = match &self.witness {
            Some(witness) => witness,
            None => return self.reject(offer, "this node does not witness").await,
        };

        let proof = witness.witness(anchor_id);
        debug!("Witnessed anchor {} for {}", anchor_id, offer.actor);
        let accept = Activity::accept(&self.node_id, offer, ActivityObject::Proof { proof }, self.clock.now());
        self.reply(accept).await
    }

    async fn handle_accept(&self, accept: &Activity) -> Result<InboxOutcome, FederationError> {
        match &accept.object {
            ActivityObject::Proof { proof } => {
                if proof.witness != accept.actor {
                    return Err(FederationError::Invalid(format!(
                        "{} sent a proof signed as {}",
                        accept.actor, proof.witness
                    )));
                }
                let disposition = self.writer.handle_witness_proof(proof).await?;
                Ok(InboxOutcome::Proof(disposition))
            }
            ActivityObject::Request {
                activity_type: ActivityType::InviteWitness,
                ..
            } => {
                self.peers.add_witness(&accept.actor).await?;
                Ok(InboxOutcome::Recorded)
            }
            ActivityObject::Request {
                activity_type: ActivityType::Follow,
                ..
            } => {
                self.peers.add_following(&accept.actor).await?;
                Ok(InboxOutcome::Recorded)
            }
            _ => Ok(InboxOutcome::Ignored(format!("unexpected Accept object in {}", accept.id))),
        }
    }

    async fn handle_reject(&self, reject: &Activity) -> Result<InboxOutcome, FederationError> {
        let reason = reject.summary.as_deref().unwrap_or("no reason given");

        match &reject.object {
            ActivityObject::Anchor { anchor_id, .. } => {
                if self.status.get_status(anchor_id).await?.is_none() {
                    return Ok(InboxOutcome::Ignored(format!("unknown anchor {}", anchor_id)));
                }
                warn!("Witness {} rejected anchor {}: {}", reject.actor, anchor_id, reason);
                self.status
                    .record_error(anchor_id, &format!("{} rejected the offer: {}", reject.actor, reason))
                    .await?;
                Ok(InboxOutcome::Recorded)
            }
            ActivityObject::Request { activity_type, .. } => {
                warn!("{} rejected our {}: {}", reject.actor, activity_type, reason);
                Ok(InboxOutcome::Recorded)
            }
            _ => Ok(InboxOutcome::Ignored(format!("unexpected Reject object in {}", reject.id))),
        }
    }
}

#[async_trait]
impl MessageHandler for Inbox {
    async fn handle(&self, message: &Message) -> Result<(), BrokerError> {
        let activity: Activity = message.decode()?;

        match Inbox::handle(self, &activity).await {
            Ok(outcome) => {
                debug!("Handled {} {}: {:?}", activity.activity_type, activity.id, outcome);
                Ok(())
            }
            Err(e) if e.is_transient() => Err(BrokerError::Handler(e.to_string())),
            Err(e) => {
                warn!("Dropping {} {}: {}", activity.activity_type, activity.id, e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::{CasResolver, LocalCas};
    use crate::clock::{secs, ManualClock};
    use crate::federation::MemoryOutbox;
    use crate::monitoring::LogEndpointRegistry;
    use crate::observer::KvDidAnchorIndex;
    use crate::status::AnchorState;
    use crate::store::{KeyValueStore, MemoryStore};
    use crate::telemetry::TelemetryReporter;
    use crate::anchor::{AnchorGraph, OperationRef, OperationType};
    use crate::witness::{PolicyProvider, WitnessProofStore};
    use crate::writer::WriterSettings;

    const ME: &str = "https://orb.me.example";

    struct Fixture {
        clock: Arc<ManualClock>,
        outbox: Arc<MemoryOutbox>,
        peers: Arc<PeerStore>,
        status: Arc<AnchorStatusStore>,
        writer: Arc<AnchorWriter>,
        inbox: Inbox,
    }

    fn fixture(authorizer: AcceptListAuthorizer) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cas = Arc::new(CasResolver::new(Arc::new(LocalCas::new(store.clone())), 16));
        let graph = Arc::new(AnchorGraph::new(cas, clock.clone()));
        let index = Arc::new(KvDidAnchorIndex::new(store.clone(), clock.clone()));
        let observer = Arc::new(Observer::new(graph.clone(), index, store.clone(), clock.clone(), 3));
        let status = Arc::new(AnchorStatusStore::new(
            store.clone(),
            clock.clone(),
            Arc::new(TelemetryReporter::new(0)),
            secs(30),
            secs(660),
            secs(86_400),
        ));
        let peers = Arc::new(PeerStore::new(store.clone(), clock.clone()));
        let outbox = Arc::new(MemoryOutbox::new());

        let writer = Arc::new(AnchorWriter::new(
            WriterSettings {
                node_id: ME.to_string(),
                sign_with_local_witness: false,
                system_witnesses: Vec::new(),
                batch_witnesses: vec!["https://w1".to_string()],
                max_batch_witnesses: 3,
                max_witness_delay: secs(600),
            },
            graph,
            observer.clone(),
            Arc::new(PolicyProvider::new(store.clone(), "MinPercent(100,batch)", secs(60), clock.clone())),
            Arc::new(WitnessProofStore::new(store.clone(), clock.clone(), secs(86_400))),
            status.clone(),
            Arc::new(LogEndpointRegistry::new(store, Vec::new())),
            peers.clone(),
            outbox.clone(),
            clock.clone(),
        ));

        let inbox = Inbox::new(
            ME,
            writer.clone(),
            observer,
            status.clone(),
            peers.clone(),
            authorizer,
            outbox.clone(),
            clock.clone(),
        )
        .with_witness(Arc::new(LocalWitness::new(ME, &[4u8; 32], clock.clone())));

        Fixture {
            clock,
            outbox,
            peers,
            status,
            writer,
            inbox,
        }
    }

    fn offer_from(actor: &str, clock: &ManualClock) -> Activity {
        let now = clock.now();
        Activity::offer(actor, ME, &ContentHash::compute(b"their-anchor"), actor, now, now + secs(600))
    }

    #[tokio::test]
    async fn test_offer_is_signed_and_accepted() {
        let f = fixture(AcceptListAuthorizer::accept_all());
        let offer = offer_from("https://other", &f.clock);

        let outcome = f.inbox.handle(&offer).await.unwrap();
        assert_eq!(outcome, InboxOutcome::Replied(ActivityType::Accept));

        let accept = f.outbox.take().pop().unwrap();
        assert_eq!(accept.to, vec!["https://other".to_string()]);
        match accept.object {
            ActivityObject::Proof { proof } => {
                assert_eq!(proof.witness, ME);
                assert_eq!(proof.anchor_id, ContentHash::compute(b"their-anchor"));
            }
            other => panic!("unexpected object {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_offer_is_rejected() {
        let f = fixture(AcceptListAuthorizer::accept_all());
        let offer = offer_from("https://other", &f.clock);
        f.clock.advance(secs(601));

        assert_eq!(
            f.inbox.handle(&offer).await.unwrap(),
            InboxOutcome::Replied(ActivityType::Reject)
        );
        assert_eq!(f.outbox.sent()[0].summary.as_deref(), Some("offer expired"));
    }

    #[tokio::test]
    async fn test_offer_needs_an_invitation_when_listed() {
        let f = fixture(AcceptListAuthorizer::new(None, Some(vec!["https://friend".to_string()])));

        let stranger = offer_from("https://stranger", &f.clock);
        assert_eq!(
            f.inbox.handle(&stranger).await.unwrap(),
            InboxOutcome::Replied(ActivityType::Reject)
        );

        // An invitation from an allowed actor is remembered
        let invite = Activity::invite_witness("https://friend", ME, f.clock.now());
        f.inbox.handle(&invite).await.unwrap();
        assert!(f.peers.is_witnessing("https://friend").await.unwrap());

        let friendly = offer_from("https://friend", &f.clock);
        assert_eq!(
            f.inbox.handle(&friendly).await.unwrap(),
            InboxOutcome::Replied(ActivityType::Accept)
        );
    }

    #[tokio::test]
    async fn test_follow_is_persisted_once() {
        let f = fixture(AcceptListAuthorizer::new(Some(vec!["https://fan".to_string()]), None));

        let follow = Activity::follow("https://fan", ME, f.clock.now());
        f.inbox.handle(&follow).await.unwrap();
        f.inbox.handle(&follow).await.unwrap();
        assert_eq!(f.peers.followers().await.unwrap(), vec!["https://fan".to_string()]);

        let denied = Activity::follow("https://troll", ME, f.clock.now());
        assert_eq!(
            f.inbox.handle(&denied).await.unwrap(),
            InboxOutcome::Replied(ActivityType::Reject)
        );
        assert_eq!(f.peers.followers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_with_proof_completes_our_anchor() {
        let f = fixture(AcceptListAuthorizer::accept_all());
        let anchor_id = f
            .writer
            .write_anchor(vec![OperationRef::new("did:orb:abc", "op", OperationType::Create)])
            .await
            .unwrap();
        let offer = f.outbox.take().pop().unwrap();

        let proof = LocalWitness::new("https://w1", &[8u8; 32], f.clock.clone()).witness(&anchor_id);
        let accept = Activity::accept("https://w1", &offer, ActivityObject::Proof { proof }, f.clock.now());

        assert_eq!(
            f.inbox.handle(&accept).await.unwrap(),
            InboxOutcome::Proof(ProofDisposition::Completed)
        );
        assert_eq!(
            f.inbox.handle(&accept).await.unwrap(),
            InboxOutcome::Proof(ProofDisposition::Ignored("anchor is completed".to_string()))
        );
        assert_eq!(
            f.status.get_status(&anchor_id).await.unwrap().unwrap().state,
            AnchorState::Completed
        );
    }

    #[tokio::test]
    async fn test_reject_is_recorded_on_the_anchor() {
        let f = fixture(AcceptListAuthorizer::accept_all());
        let anchor_id = f
            .writer
            .write_anchor(vec![OperationRef::new("did:orb:abc", "op", OperationType::Create)])
            .await
            .unwrap();
        let offer = f.outbox.take().pop().unwrap();

        let reject = Activity::reject("https://w1", &offer, "busy", f.clock.now());
        assert_eq!(f.inbox.handle(&reject).await.unwrap(), InboxOutcome::Recorded);

        let status = f.status.get_status(&anchor_id).await.unwrap().unwrap();
        assert_eq!(status.state, AnchorState::InProcess);
        assert_eq!(
            status.last_error.as_deref(),
            Some("https://w1 rejected the offer: busy")
        );
    }

    #[tokio::test]
    async fn test_announce_is_indexed_only_from_followed_nodes() {
        let f = fixture(AcceptListAuthorizer::accept_all());
        let anchor_id = f
            .writer
            .write_anchor(vec![OperationRef::new("did:orb:abc", "op", OperationType::Create)])
            .await
            .unwrap();
        let publisher = "https://publisher";
        let announce = Activity::announce(publisher, vec![ME.to_string()], &anchor_id, ME, f.clock.now());

        assert!(matches!(
            f.inbox.handle(&announce).await.unwrap(),
            InboxOutcome::Ignored(_)
        ));

        let follow = Activity::follow(ME, publisher, f.clock.now());
        let accept = Activity::accept(publisher, &follow, follow.as_request(), f.clock.now());
        assert_eq!(f.inbox.handle(&accept).await.unwrap(), InboxOutcome::Recorded);
        assert!(f.peers.is_following(publisher).await.unwrap());

        assert_eq!(
            f.inbox.handle(&announce).await.unwrap(),
            InboxOutcome::Observed(ObserveOutcome::Indexed { applied: 1 })
        );
    }
}
