//! Node repository.
//!
//! CRUD and query operations over namespace-relative node paths. Every call
//! returns an [`Outcome`]: a missing node is `NotFound`, any other failure is
//! logged and handed back as `Failed`. With
//! [`FailurePolicy::Neutralize`] read-style calls collapse infrastructure
//! failures into their neutral answer instead.

mod outcome;

pub use outcome::*;


use tracing::debug;
use tracing::warn;

use crate::backend::CreateMode;
use crate::backend::Stat;
use crate::metrics::record_operation;
use crate::serialize::PayloadCodec;
use crate::CoordinationError;
use crate::Error;
use crate::FailurePolicy;
use crate::RepositoryConfig;
use crate::Session;

#[derive(Clone, Debug)]
pub struct NodeRepository {
    session: Session,
    read_failure_policy: FailurePolicy,
}

impl NodeRepository {
    pub fn new(
        session: Session,
        config: &RepositoryConfig,
    ) -> Self {
        Self {
            session,
            read_failure_policy: config.read_failure_policy,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Creates a node, creating missing parents as empty persistent nodes.
    ///
    /// Returns the created path, which carries the sequence suffix for
    /// sequential modes.
    pub async fn create_node(
        &self,
        mode: CreateMode,
        path: &str,
        payload: Option<&[u8]>,
    ) -> Outcome<String> {
        let result = self
            .session
            .create(path, payload.unwrap_or_default(), mode, true)
            .await;
        if let Ok(created) = &result {
            debug!(path, created = %created, ?mode, "node created");
        }
        self.observe("create_node", path, result.into())
    }

    /// Deletes `path` and everything below it.
    pub async fn delete(
        &self,
        path: &str,
    ) -> Outcome<()> {
        self.delete_node(path, true).await
    }

    /// Deletes `path`, first removing its descendants deepest-first when
    /// `delete_children` is set. Transient failures are finished in the
    /// background by the session and reported as success.
    pub async fn delete_node(
        &self,
        path: &str,
        delete_children: bool,
    ) -> Outcome<()> {
        let result = if delete_children {
            self.session.delete_tree_guaranteed(path).await
        } else {
            self.session.delete_guaranteed(path).await
        };
        self.observe("delete_node", path, result.into())
    }

    /// Overwrites node data without a version check.
    pub async fn set_node_data(
        &self,
        path: &str,
        payload: &[u8],
    ) -> Outcome<Stat> {
        let result = self.session.set_data(path, payload).await;
        self.observe("set_node_data", path, result.into())
    }

    /// Reads node data straight from the service.
    pub async fn get_node_data(
        &self,
        path: &str,
    ) -> Outcome<Vec<u8>> {
        let result = self.session.get_data(path).await.map(|(data, _)| data);
        let outcome = self.observe("get_node_data", path, result.into());
        self.neutralize(outcome, || Outcome::NotFound)
    }

    /// Reads after a sync barrier, observing every write that completed
    /// before the call.
    pub async fn sync_then_get_node_data(
        &self,
        path: &str,
    ) -> Outcome<Vec<u8>> {
        let result = async {
            self.session.sync(path).await?;
            self.session.get_data(path).await.map(|(data, _)| data)
        }
        .await;
        let outcome = self.observe("sync_then_get_node_data", path, result.into());
        self.neutralize(outcome, || Outcome::NotFound)
    }

    /// Existence check preceded by a sync barrier.
    pub async fn node_exists(
        &self,
        path: &str,
    ) -> Outcome<bool> {
        let result = async {
            self.session.sync(path).await?;
            self.session.exists(path).await.map(|stat| stat.is_some())
        }
        .await;
        let outcome = self.observe("node_exists", path, result.into());
        self.neutralize(outcome, || Outcome::Ok(false))
    }

    /// Child names sorted lexicographically, so sequential nodes come out in
    /// creation order.
    pub async fn list_children(
        &self,
        path: &str,
    ) -> Outcome<Vec<String>> {
        let result = self.session.get_children(path).await.map(|mut children| {
            children.sort();
            children
        });
        let outcome = self.observe("list_children", path, result.into());
        self.neutralize(outcome, || Outcome::Ok(Vec::new()))
    }

    pub async fn node_stat(
        &self,
        path: &str,
    ) -> Outcome<Stat> {
        let result = self
            .session
            .exists(path)
            .await
            .and_then(|stat| stat.ok_or_else(|| CoordinationError::NoNode(path.to_string()).into()));
        let outcome = self.observe("node_stat", path, result.into());
        self.neutralize(outcome, || Outcome::NotFound)
    }

    pub async fn create_typed_node<T, C>(
        &self,
        mode: CreateMode,
        path: &str,
        value: &T,
        codec: &C,
    ) -> Outcome<String>
    where
        C: PayloadCodec<T>,
    {
        match codec.encode(value) {
            Ok(bytes) => self.create_node(mode, path, Some(&bytes)).await,
            Err(e) => self.observe("create_node", path, Outcome::Failed(e)),
        }
    }

    pub async fn set_typed_node_data<T, C>(
        &self,
        path: &str,
        value: &T,
        codec: &C,
    ) -> Outcome<Stat>
    where
        C: PayloadCodec<T>,
    {
        match codec.encode(value) {
            Ok(bytes) => self.set_node_data(path, &bytes).await,
            Err(e) => self.observe("set_node_data", path, Outcome::Failed(e)),
        }
    }

    /// Typed read. Decode failures are always reported, whatever the read
    /// failure policy.
    pub async fn get_typed_node_data<T, C>(
        &self,
        path: &str,
        codec: &C,
    ) -> Outcome<T>
    where
        C: PayloadCodec<T>,
    {
        match self.get_node_data(path).await {
            Outcome::Ok(bytes) => match codec.decode(&bytes) {
                Ok(value) => Outcome::Ok(value),
                Err(e) => self.observe("decode_node_data", path, Outcome::Failed(e)),
            },
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    fn observe<T>(
        &self,
        operation: &'static str,
        path: &str,
        outcome: Outcome<T>,
    ) -> Outcome<T> {
        if let Outcome::Failed(e) = &outcome {
            warn!(operation, path, error = %e, "coordination operation failed");
        }
        record_operation(operation, outcome.label());
        outcome
    }

    fn neutralize<T>(
        &self,
        outcome: Outcome<T>,
        neutral: impl FnOnce() -> Outcome<T>,
    ) -> Outcome<T> {
        match outcome {
            Outcome::Failed(e)
                if self.read_failure_policy == FailurePolicy::Neutralize && !matches!(e, Error::Serialization(_)) =>
            {
                neutral()
            }
            other => other,
        }
    }
}
