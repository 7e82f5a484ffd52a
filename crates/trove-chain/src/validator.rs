//! Staged chain-of-trust validation of one incoming data message.
//!
//! A [`TrustValidator`] moves through four checks in strict order:
//!
//! 1. **parent**: the declared type may (or must) attach to the given parent;
//! 2. **lineage**: an existing entity keeps its parent and is not immutable;
//! 3. **leaf**: the signing key holds a write role inherited from the entity,
//!    its ancestors, the root of trust or an implicit authority;
//! 4. **signature**: the digest matches the message and is signed by that key.
//!
//! Each stage consumes the state produced by the previous one. The first
//! failure is reported once through the failure callback and remembered, so
//! calling [`TrustValidator::validate_all`] again gives the same answer
//! without redoing work.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};
use trove_crypto::{CryptoPort, trust_of_public_write};
use trove_types::{
    EntityId, KeyHash, MessageData, MessageDataDigest, MessageDataHeader, MessagePublicKey,
    ParentPolicy, ParentPolicyTable, PartitionKey,
};

use crate::authority::ImplicitAuthority;
use crate::container::DataContainer;

/// Why a message was refused admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("missing digest")]
    MissingDigest,

    #[error("parent policy not defined for this entity type [type={ty}]")]
    PolicyUndefined { ty: String },

    #[error("parent not allowed for this entity type [type={ty}]")]
    ParentNotAllowed { ty: String },

    #[error("must have parent for this entity type [type={ty}]")]
    ParentRequired { ty: String },

    #[error("parent is missing in chain of trust [parent={parent}]")]
    ParentMissing { parent: EntityId },

    #[error("parent type not allowed [type={ty}, parent_type={parent_ty}]")]
    ParentTypeNotAllowed { ty: String, parent_ty: String },

    #[error("parent has changed [was={was}, now={now}]")]
    ParentChanged { was: String, now: String },

    #[error("record is immutable")]
    Immutable,

    #[error("record missing implicit authority")]
    MissingImplicitAuthority,

    #[error("implicit authority missing [{domain}]")]
    ImplicitAuthorityUnresolved { domain: String },

    #[error("implicit authority returned a public key that failed validation [{domain}]")]
    ImplicitKeyInvalid { domain: String },

    #[error("record has no leaf to attach to")]
    NoLeaf,

    #[error("entity has write roles but public key is missing")]
    PublicKeyMissing,

    #[error("entity has no right to attach to its parent{diagnostics}")]
    NoWriteRight { diagnostics: String },

    #[error("digest differential")]
    DigestDifferential,

    #[error("digest of payload bytes invalid")]
    DigestInvalid,

    #[error("signature bytes invalid")]
    SignatureInvalid,

    #[error("signature verification failed")]
    SignatureFailed,

    /// An unexpected fault (malformed header, codec error) downgraded to a
    /// rejection.
    #[error("{0}")]
    Fault(String),
}

/// Records and keys the validator may consult.
pub trait TrustSource {
    fn container(&self, id: &EntityId) -> Option<Arc<DataContainer>>;
    fn root_of_trust(&self, id: &EntityId) -> Option<MessageDataHeader>;
    fn public_key(&self, hash: &KeyHash) -> Option<MessagePublicKey>;
}

/// Invoked once per rejected message.
pub type FailureCallback<'a> = &'a dyn Fn(&MessageDataHeader, &RejectReason);

/// Shared configuration for building validators.
#[derive(Clone, Copy)]
pub struct TrustValidatorBuilder<'a> {
    policy: &'a ParentPolicyTable,
    crypto: &'a dyn CryptoPort,
    authorities: &'a dyn ImplicitAuthority,
    extra_validation: bool,
    staged: Option<&'a BTreeMap<EntityId, MessageData>>,
    on_failure: Option<FailureCallback<'a>>,
}

impl<'a> TrustValidatorBuilder<'a> {
    pub fn new(
        policy: &'a ParentPolicyTable,
        crypto: &'a dyn CryptoPort,
        authorities: &'a dyn ImplicitAuthority,
    ) -> Self {
        Self {
            policy,
            crypto,
            authorities,
            extra_validation: false,
            staged: None,
            on_failure: None,
        }
    }

    /// Also check the hash of keys returned by implicit authorities.
    pub fn with_extra_validation(mut self, enabled: bool) -> Self {
        self.extra_validation = enabled;
        self
    }

    /// In-flight writes consulted before the chain's containers.
    pub fn with_staged(mut self, staged: &'a BTreeMap<EntityId, MessageData>) -> Self {
        self.staged = Some(staged);
        self
    }

    pub fn with_failure_callback(mut self, callback: FailureCallback<'a>) -> Self {
        self.on_failure = Some(callback);
        self
    }

    /// Create a validator for `data`, positioned before the first stage.
    pub fn build(
        &self,
        partition: &'a PartitionKey,
        data: &'a MessageData,
        source: &'a dyn TrustSource,
    ) -> TrustValidator<'a> {
        let id = data.header.id;
        let existing = match self.staged.and_then(|staged| staged.get(&id)) {
            Some(staged) => Some(staged.clone()),
            None => source.container(&id).and_then(|c| c.last_data()),
        };

        TrustValidator {
            ctx: *self,
            partition,
            source,
            data,
            existing,
            stage: Stage::Received,
        }
    }

    /// Run every stage. Rejections go to the failure callback.
    pub fn validate(
        &self,
        partition: &'a PartitionKey,
        data: &'a MessageData,
        source: &'a dyn TrustSource,
    ) -> bool {
        self.build(partition, data, source).validate_all()
    }

    /// Run every stage and return the rejection reason, if any.
    pub fn check(
        &self,
        partition: &'a PartitionKey,
        data: &'a MessageData,
        source: &'a dyn TrustSource,
    ) -> Result<(), RejectReason> {
        let mut validator = self.build(partition, data, source);
        if validator.validate_all() {
            return Ok(());
        }
        Err(validator
            .reason()
            .cloned()
            .unwrap_or_else(|| RejectReason::Fault("validation failed".into())))
    }
}

// -----------------------------------------------------------------------
// Stages
// -----------------------------------------------------------------------

/// State after the parent check.
struct ParentState<'a> {
    digest: &'a MessageDataDigest,
    parent: Option<MessageData>,
}

/// State after the signing key was resolved.
struct LeafState<'a> {
    digest: &'a MessageDataDigest,
    public_key: MessagePublicKey,
}

enum Stage<'a> {
    Received,
    ParentValid(ParentState<'a>),
    LineageValid(ParentState<'a>),
    LeafValid(LeafState<'a>),
    Verified(MessagePublicKey),
    Rejected(RejectReason),
}

impl Stage<'_> {
    fn name(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::ParentValid(_) => "parent",
            Stage::LineageValid(_) => "lineage",
            Stage::LeafValid(_) => "leaf",
            Stage::Verified(_) => "verified",
            Stage::Rejected(_) => "rejected",
        }
    }
}

/// Validation state machine over one candidate message.
pub struct TrustValidator<'a> {
    ctx: TrustValidatorBuilder<'a>,
    partition: &'a PartitionKey,
    source: &'a dyn TrustSource,
    data: &'a MessageData,
    /// Latest accepted (or staged) version of the same entity.
    existing: Option<MessageData>,
    stage: Stage<'a>,
}

impl fmt::Debug for TrustValidator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustValidator")
            .field("partition", self.partition)
            .field("id", &self.data.header.id)
            .field("stage", &self.stage.name())
            .finish_non_exhaustive()
    }
}

impl<'a> TrustValidator<'a> {
    /// Run the remaining stages. Returns the same answer on every call.
    pub fn validate_all(&mut self) -> bool {
        loop {
            match self.stage {
                Stage::Verified(_) => return true,
                Stage::Rejected(_) => return false,
                _ => {}
            }

            let current = std::mem::replace(&mut self.stage, Stage::Received);
            self.stage = match self.advance(current) {
                Ok(next) => next,
                Err(reason) => {
                    self.fail(&reason);
                    Stage::Rejected(reason)
                }
            };
        }
    }

    /// Run a single transition.
    fn advance(&self, stage: Stage<'a>) -> Result<Stage<'a>, RejectReason> {
        match stage {
            Stage::Received => self.validate_parent().map(Stage::ParentValid),
            Stage::ParentValid(state) => self.validate_isnt_reparenting(state).map(Stage::LineageValid),
            Stage::LineageValid(state) => self.validate_leaf(state).map(Stage::LeafValid),
            Stage::LeafValid(state) => {
                self.validate_signature(&state)?;
                Ok(Stage::Verified(state.public_key))
            }
            done @ (Stage::Verified(_) | Stage::Rejected(_)) => Ok(done),
        }
    }

    /// Name of the current stage.
    pub fn stage(&self) -> &'static str {
        self.stage.name()
    }

    /// The rejection, once validation failed.
    pub fn reason(&self) -> Option<&RejectReason> {
        match &self.stage {
            Stage::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Key that signed the message, once resolved.
    pub fn signer(&self) -> Option<&MessagePublicKey> {
        match &self.stage {
            Stage::LeafValid(state) => Some(&state.public_key),
            Stage::Verified(key) => Some(key),
            _ => None,
        }
    }

    fn header(&self) -> &'a MessageDataHeader {
        &self.data.header
    }

    fn fail(&self, reason: &RejectReason) {
        match self.ctx.on_failure {
            Some(callback) => callback(self.header(), reason),
            None => warn!(
                partition = %self.partition,
                id = %self.header().id,
                ty = %self.header().payload_class,
                %reason,
                "trust validation failed"
            ),
        }
    }

    /// Latest data of `id`: staged writes first, then the chain.
    fn lookup_data(&self, id: &EntityId) -> Option<MessageData> {
        if let Some(staged) = self.ctx.staged.and_then(|staged| staged.get(id)) {
            return Some(staged.clone());
        }
        self.source.container(id).and_then(|c| c.last_data())
    }

    // -------------------------------------------------------------------
    // Stage 1: structural parent
    // -------------------------------------------------------------------

    fn validate_parent(&self) -> Result<ParentState<'a>, RejectReason> {
        let header = self.header();
        let digest = self.data.digest.as_ref().ok_or(RejectReason::MissingDigest)?;
        let ty = header.payload_class.as_str();

        let parent = match self.ctx.policy.policy(ty) {
            ParentPolicy::Undefined => {
                return Err(match header.parent_id {
                    Some(_) => RejectReason::ParentNotAllowed { ty: ty.into() },
                    None => RejectReason::PolicyUndefined { ty: ty.into() },
                });
            }
            ParentPolicy::ParentFree => {
                if header.parent_id.is_some() {
                    return Err(RejectReason::ParentNotAllowed { ty: ty.into() });
                }
                None
            }
            ParentPolicy::RequiresParent(allowed) => {
                let parent_id = header
                    .parent_id
                    .ok_or_else(|| RejectReason::ParentRequired { ty: ty.into() })?;
                let parent = self
                    .lookup_data(&parent_id)
                    .ok_or(RejectReason::ParentMissing { parent: parent_id })?;
                if !allowed.contains(&parent.header.payload_class) {
                    return Err(RejectReason::ParentTypeNotAllowed {
                        ty: ty.into(),
                        parent_ty: parent.header.payload_class.clone(),
                    });
                }
                Some(parent)
            }
        };

        Ok(ParentState { digest, parent })
    }

    // -------------------------------------------------------------------
    // Stage 2: lineage
    // -------------------------------------------------------------------

    fn validate_isnt_reparenting(&self, state: ParentState<'a>) -> Result<ParentState<'a>, RejectReason> {
        if let Some(existing) = &self.existing {
            let was = existing.header.parent_id;
            let now = self.header().parent_id;
            if was != now {
                return Err(RejectReason::ParentChanged {
                    was: display_opt(was),
                    now: display_opt(now),
                });
            }
            if existing.header.is_immutable() {
                return Err(RejectReason::Immutable);
            }
        }
        Ok(state)
    }

    // -------------------------------------------------------------------
    // Stage 3: write role
    // -------------------------------------------------------------------

    fn validate_leaf(&self, state: ParentState<'a>) -> Result<LeafState<'a>, RejectReason> {
        let header = self.header();
        let ty = header.payload_class.as_str();
        let policy = self.ctx.policy;
        let wanted = state.digest.public_key_hash;

        let mut public_key: Option<MessagePublicKey> = None;
        let mut leaf = self.existing.clone().or_else(|| state.parent.clone());

        if leaf.is_none() {
            let mut authority = policy.static_authority(ty).map(str::to_string);
            if authority.is_none() && policy.is_dynamic_authority(ty) {
                let domain = header
                    .implicit_authority
                    .iter()
                    .next()
                    .ok_or(RejectReason::MissingImplicitAuthority)?;
                authority = Some(domain.clone());
            }

            if policy.is_claimable(ty) {
                public_key = Some(trust_of_public_write().public_key());
                debug!(partition = %self.partition, id = %header.id, %ty, "claimed");
            } else if let Some(domain) = authority.filter(|_| policy.is_parent_free(ty)) {
                let key = self
                    .ctx
                    .authorities
                    .resolve(&domain)
                    .ok_or_else(|| RejectReason::ImplicitAuthorityUnresolved { domain: domain.clone() })?;
                if self.ctx.extra_validation && !key.verify_hash() {
                    return Err(RejectReason::ImplicitKeyInvalid { domain });
                }
                debug!(partition = %self.partition, id = %header.id, %ty, %domain, "rooted by implicit authority");
                public_key = Some(key);
            } else {
                return Err(RejectReason::NoLeaf);
            }
        }

        let mut available: Vec<KeyHash> = Vec::new();
        let mut role_found = false;

        while public_key.is_none() {
            let Some(current) = leaf.take() else {
                break;
            };
            public_key = self.match_role(&current.header, wanted, &mut available, &mut role_found);
            if !current.header.inherit_write {
                break;
            }
            leaf = current.header.parent_id.and_then(|pid| self.lookup_data(&pid));
        }

        if public_key.is_none()
            && let Some(root) = self.source.root_of_trust(&header.id)
        {
            public_key = self.match_role(&root, wanted, &mut available, &mut role_found);
        }

        match public_key {
            Some(public_key) => Ok(LeafState {
                digest: state.digest,
                public_key,
            }),
            None if role_found => Err(RejectReason::PublicKeyMissing),
            None => Err(RejectReason::NoWriteRight {
                diagnostics: self.diagnostics(&state, &available, wanted),
            }),
        }
    }

    /// Look for `wanted` among the write roles of one level.
    fn match_role(
        &self,
        level: &MessageDataHeader,
        wanted: KeyHash,
        available: &mut Vec<KeyHash>,
        role_found: &mut bool,
    ) -> Option<MessagePublicKey> {
        for hash in &level.allow_write {
            available.push(*hash);
            if *hash == wanted {
                *role_found = true;
                if let Some(key) = self.source.public_key(hash) {
                    return Some(key);
                }
            }
        }
        None
    }

    fn diagnostics(&self, state: &ParentState<'_>, available: &[KeyHash], wanted: KeyHash) -> String {
        let header = self.header();
        let mut out = String::new();

        let leaf = match &self.existing {
            None => "new".to_string(),
            Some(existing) => match &existing.payload {
                None => "tombstoned".to_string(),
                Some(payload) => format!("payload={} bytes", payload.len()),
            },
        };
        out.push_str(&format!("\n [leaf: {leaf}]"));
        out.push_str(&format!("\n [entity: type={}, id={}]", header.payload_class, header.id));
        match &state.parent {
            Some(parent) => out.push_str(&format!(
                "\n [parent: type={}, id={}]",
                parent.header.payload_class, parent.header.id
            )),
            None => out.push_str("\n [parent: none]"),
        }

        for role in available {
            out.push_str(&format!("\n [needs: hash={role}{}]", self.describe_key(role)));
        }
        if available.is_empty() {
            let why = if self.existing.is_some() {
                "impossible as record is missing write roles"
            } else if state.parent.is_some() {
                "impossible as no existing record exists and its parent is immutable"
            } else {
                "impossible as no existing record exists and it is orphaned"
            };
            out.push_str(&format!("\n [needs: {why}]"));
        }

        out.push_str(&format!("\n [digest: hash={wanted}{}]", self.describe_key(&wanted)));
        out
    }

    fn describe_key(&self, hash: &KeyHash) -> String {
        match self.source.public_key(hash) {
            Some(key) => key.alias.map(|a| format!(", alias={a}")).unwrap_or_default(),
            None => ", missing".to_string(),
        }
    }

    // -------------------------------------------------------------------
    // Stage 4: signature
    // -------------------------------------------------------------------

    fn validate_signature(&self, state: &LeafState<'a>) -> Result<(), RejectReason> {
        let digest = state.digest;
        let input = self
            .data
            .digest_input()
            .map_err(|e| RejectReason::Fault(e.to_string()))?;

        let computed = self.ctx.crypto.hash(&digest.seed, &input);
        if computed != digest.digest {
            return Err(RejectReason::DigestDifferential);
        }
        if computed.len() <= 4 {
            return Err(RejectReason::DigestInvalid);
        }
        if digest.signature.len() <= 4 {
            return Err(RejectReason::SignatureInvalid);
        }
        if !self
            .ctx
            .crypto
            .verify(&state.public_key.public_key, &digest.digest, &digest.signature)
        {
            return Err(RejectReason::SignatureFailed);
        }

        trace!(
            partition = %self.partition,
            id = %self.header().id,
            signer = %state.public_key.public_key_hash,
            "signature verified"
        );
        Ok(())
    }
}

fn display_opt(id: Option<EntityId>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "none".into())
}
