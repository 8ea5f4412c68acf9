use futures::future::join_all;
use serde_json::Value;

use crate::endpoints;
use crate::error::AppError;
use crate::fetcher::DeskFetcher;
use crate::models::{Thread, Ticket, items_of, text};
use crate::pool::Pool;
use crate::traits::{TokenProvider, Transport};

/// Threads gathered for one ticket, with the number of fetches that
/// degraded or failed along the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichOutcome {
    pub threads: Vec<Thread>,
    pub errors: u64,
}

/// Attaches threads to tickets. Every network call it makes goes through
/// the shared pool.
#[derive(Clone)]
pub struct Enricher<T, P> {
    fetcher: DeskFetcher<T, P>,
    pool: Pool,
}

impl<T: Transport, P: TokenProvider> Enricher<T, P> {
    pub fn new(fetcher: DeskFetcher<T, P>, pool: Pool) -> Self {
        Self { fetcher, pool }
    }

    pub fn fetcher(&self) -> &DeskFetcher<T, P> {
        &self.fetcher
    }

    /// Run one `get_json` call in a pool slot.
    pub async fn fetch(&self, endpoint: String) -> Result<Value, AppError> {
        let fetcher = self.fetcher.clone();
        self.pool
            .submit(async move { fetcher.get_json(&endpoint).await })
            .await?
    }

    /// Fetch the full threads of a ticket. Never fails.
    ///
    /// A failed thread listing yields no threads and one error. A failed
    /// detail fetch falls back to the listing summary of that thread and
    /// counts one error.
    pub async fn fetch_threads(&self, ticket_id: &str) -> EnrichOutcome {
        let listing = match self.fetch(endpoints::threads(ticket_id)).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(%ticket_id, error = %e, "Could not list threads");
                return EnrichOutcome {
                    threads: Vec::new(),
                    errors: 1,
                };
            }
        };

        let summaries = items_of(&listing);
        if summaries.is_empty() {
            return EnrichOutcome::default();
        }

        // All details are queued on the first poll of the join.
        let details = summaries
            .iter()
            .map(|summary| {
                let thread_id = text(summary, "id");
                async move {
                    if thread_id.is_empty() {
                        return Err(AppError::Generic("thread summary has no id".into()));
                    }
                    self.fetch(endpoints::thread(ticket_id, &thread_id)).await
                }
            })
            .collect::<Vec<_>>();
        let details = join_all(details).await;

        let mut outcome = EnrichOutcome::default();
        for (summary, detail) in summaries.iter().zip(details) {
            match detail {
                Ok(full) => outcome.threads.push(Thread::from_raw(&full)),
                Err(e) => {
                    let thread = Thread::from_raw(summary);
                    tracing::warn!(
                        %ticket_id,
                        thread_id = %thread.thread_id,
                        error = %e,
                        "Thread detail failed, keeping summary"
                    );
                    outcome.threads.push(thread);
                    outcome.errors += 1;
                }
            }
        }
        outcome
    }

    /// Append the threads of `ticket` in place and return the error count.
    pub async fn enrich(&self, ticket: &mut Ticket) -> u64 {
        let outcome = self.fetch_threads(&ticket.ticket_id).await;
        ticket.threads.extend(outcome.threads);
        outcome.errors
    }
}
