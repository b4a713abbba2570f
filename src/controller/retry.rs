//! Read-modify-write with retry on stale resourceVersion
//!
//! Each attempt re-reads the object, re-applies the intended mutation and
//! writes it back. Only conflicts are retried here; every other error goes
//! straight back to the caller.

use std::future::Future;

use tracing::debug;

use crate::controller::client::DoguClient;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::crd::{Dogu, DoguRestart, DoguRestartStatus, DoguStatus, RestartPhase};

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// attempt budget is exhausted
pub async fn retry_on_conflict<T, F, Fut>(backoff: &BackoffConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt + 1 < backoff.max_attempts => {
                debug!(attempt, error = %e, "conflict on write, retrying with fresh object");
                tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

async fn fetch_dogu(client: &dyn DoguClient, namespace: &str, name: &str) -> Result<Dogu> {
    client
        .get_dogu(namespace, name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("dogu {}/{}", namespace, name)))
}

/// Apply `mutate` to the latest Dogu and write spec/metadata back
pub async fn update_dogu_with_retry<F>(
    client: &dyn DoguClient,
    backoff: &BackoffConfig,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Dogu>
where
    F: Fn(&mut Dogu) + Send + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(backoff, move || async move {
        let mut dogu = fetch_dogu(client, namespace, name).await?;
        mutate(&mut dogu);
        client.update_dogu(&dogu).await
    })
    .await
}

/// Apply `mutate` to the latest Dogu status and write it back
pub async fn update_dogu_status_with_retry<F>(
    client: &dyn DoguClient,
    backoff: &BackoffConfig,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Dogu>
where
    F: Fn(&mut DoguStatus) + Send + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(backoff, move || async move {
        let mut dogu = fetch_dogu(client, namespace, name).await?;
        mutate(dogu.status.get_or_insert_with(DoguStatus::default));
        client.update_dogu_status(&dogu).await
    })
    .await
}

/// Persist a new restart phase on the latest DoguRestart
pub async fn update_restart_phase_with_retry(
    client: &dyn DoguClient,
    backoff: &BackoffConfig,
    namespace: &str,
    name: &str,
    phase: RestartPhase,
) -> Result<DoguRestart> {
    retry_on_conflict(backoff, move || async move {
        let mut restart = client
            .get_restart(namespace, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dogurestart {}/{}", namespace, name)))?;
        restart.status = Some(DoguRestartStatus { phase });
        client.update_restart_status(&restart).await
    })
    .await
}
