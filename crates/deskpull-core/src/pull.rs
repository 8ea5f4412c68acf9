use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::endpoints;
use crate::enrich::{EnrichOutcome, Enricher};
use crate::error::AppError;
use crate::fetcher::DeskFetcher;
use crate::models::{PullResult, Ticket, items_of};
use crate::pool::Pool;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::traits::{TicketSink, TokenProvider, Transport};

/// Largest page the listing endpoint serves.
pub const PAGE_SIZE: usize = 50;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const MAX_CONCURRENCY: usize = 25;

/// Newest first, so the `since` cutoff can stop paging early.
pub const DEFAULT_SORT: &str = "-modifiedTime";

/// Pacing of the one-off commands (`get`, `count`).
pub const COMMAND_DELAY: Duration = Duration::from_millis(200);

/// Write progress is reported every this many files.
const PROGRESS_EVERY: usize = 100;

/// Where a timestamp falls relative to a [`TimeWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    /// Older than `since`.
    Before,
    Inside,
    /// Newer than `until`.
    After,
}

/// Optional inclusive bounds on a ticket's activity time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn position(&self, at: DateTime<Utc>) -> WindowPosition {
        if self.since.is_some_and(|since| at < since) {
            WindowPosition::Before
        } else if self.until.is_some_and(|until| at > until) {
            WindowPosition::After
        } else {
            WindowPosition::Inside
        }
    }
}

/// Knobs of one pull run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOptions {
    pub window: TimeWindow,
    /// Stop after this many accepted tickets.
    pub limit: Option<usize>,
    /// Clamped to `1..=MAX_CONCURRENCY`.
    pub concurrency: usize,
    pub rate: RateLimitConfig,
    /// Listing status filter; `all` or `None` lists everything.
    pub status: Option<String>,
    pub sort: String,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            window: TimeWindow::default(),
            limit: None,
            concurrency: DEFAULT_CONCURRENCY,
            rate: RateLimitConfig::default(),
            status: None,
            sort: DEFAULT_SORT.to_string(),
        }
    }
}

/// Events emitted during a pull for progress display.
#[derive(Debug, Clone)]
pub enum PullEvent<'a> {
    Started {
        concurrency: usize,
        rate: &'a RateLimitConfig,
        window: &'a TimeWindow,
    },
    PageRequested {
        from: usize,
        limit: usize,
    },
    ListingFailed {
        from: usize,
        error: &'a str,
    },
    /// Paging is over; remaining enrichments are being awaited.
    Draining {
        tickets: usize,
    },
    /// Reported while enrichments are joined after paging, in listing
    /// order, not at the moment each enrichment completes.
    TicketEnriched {
        label: &'a str,
        threads: usize,
        position: usize,
        limit: Option<usize>,
    },
    EnrichmentFailed {
        label: &'a str,
        error: &'a str,
    },
    Progress {
        written: usize,
        total: usize,
        remaining_credits: Option<i64>,
    },
    WriteFailed {
        label: &'a str,
        error: &'a str,
    },
    Finished {
        result: &'a PullResult,
    },
}

/// Receives pull events (decoupled from how they are displayed).
pub trait PullReporter: Send + Sync {
    fn report(&self, event: PullEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that renders events as `tracing` lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPullReporter;

impl PullReporter for TracingPullReporter {
    fn report(&self, event: PullEvent<'_>) {
        match event {
            PullEvent::Started {
                concurrency,
                rate,
                window,
            } => {
                tracing::info!(
                    concurrency,
                    credit_buffer = rate.credit_buffer,
                    min_delay_ms = %rate.min_delay.as_millis(),
                    since = ?window.since,
                    until = ?window.until,
                    "Pull started"
                );
            }
            PullEvent::PageRequested { from, limit } => {
                tracing::info!("Listing tickets {}-{}", from + 1, from + limit);
            }
            PullEvent::ListingFailed { from, error } => {
                tracing::error!(from, %error, "Listing failed, processing what was collected");
            }
            PullEvent::Draining { tickets } => {
                tracing::info!(tickets, "Listed tickets, waiting for enrichment");
            }
            PullEvent::TicketEnriched {
                label,
                threads,
                position,
                limit,
            } => {
                let of = limit.map_or_else(|| "∞".to_string(), |l| l.to_string());
                tracing::info!("✓ #{label} ({threads} threads) [{position}/{of}]");
            }
            PullEvent::EnrichmentFailed { label, error } => {
                tracing::warn!("✗ #{label}: {error}");
            }
            PullEvent::Progress {
                written,
                total,
                remaining_credits,
            } => match remaining_credits {
                Some(remaining) => {
                    tracing::info!("Wrote {written}/{total} tickets | credits remaining: {remaining}")
                }
                None => tracing::info!("Wrote {written}/{total} tickets"),
            },
            PullEvent::WriteFailed { label, error } => {
                tracing::error!(%label, %error, "Could not write ticket");
            }
            PullEvent::Finished { result } => {
                tracing::info!(
                    tickets = result.tickets,
                    written = result.written,
                    api_calls = result.api_calls,
                    errors = result.errors,
                    elapsed = %format!("{:.1}s", result.elapsed.as_secs_f64()),
                    "Done"
                );
                if let Some(remaining) = result.remaining_credits {
                    tracing::info!(remaining, "API credits remaining");
                }
            }
        }
    }
}

/// Entry point of every desk operation: the pipelined pull and the
/// one-off listing, lookup and count commands.
///
/// Generic over the transport and the token source so tests run without
/// network access.
pub struct PullService<T, P> {
    transport: T,
    tokens: P,
    base_url: String,
}

impl<T: Transport, P: TokenProvider> PullService<T, P> {
    pub fn new(transport: T, tokens: P, base_url: &str) -> Self {
        Self {
            transport,
            tokens,
            base_url: base_url.to_string(),
        }
    }

    /// Fresh limiter, fetcher and pool for one command.
    fn session(&self, concurrency: usize, rate: RateLimitConfig) -> Enricher<T, P> {
        let limiter = RateLimiter::new(rate);
        let fetcher = DeskFetcher::new(
            self.transport.clone(),
            self.tokens.clone(),
            &self.base_url,
            limiter,
        );
        Enricher::new(fetcher, Pool::new(concurrency))
    }

    /// Export every ticket of the window to `sink`, threads included.
    ///
    /// Listing pages are fetched in order; each accepted ticket starts its
    /// enrichment at once while paging continues. Writes happen after all
    /// enrichments settle, in listing order. Only a token failure before the
    /// first call aborts the run; later failures are counted and reported.
    pub async fn pull<S, R>(
        &self,
        options: &PullOptions,
        sink: &S,
        reporter: &R,
    ) -> Result<PullResult, AppError>
    where
        S: TicketSink,
        R: PullReporter,
    {
        let started = Instant::now();
        let concurrency = options.concurrency.clamp(1, MAX_CONCURRENCY);
        let enricher = self.session(concurrency, options.rate.clone());

        self.tokens.access_token().await?;

        reporter.report(PullEvent::Started {
            concurrency,
            rate: &options.rate,
            window: &options.window,
        });

        // Paging
        let mut pending: Vec<(Ticket, JoinHandle<EnrichOutcome>)> = Vec::new();
        let mut from = 0;
        'paging: loop {
            let page_limit = match options.limit {
                Some(limit) => PAGE_SIZE.min(limit.saturating_sub(pending.len())),
                None => PAGE_SIZE,
            };
            if page_limit == 0 {
                break;
            }

            reporter.report(PullEvent::PageRequested {
                from,
                limit: page_limit,
            });
            let endpoint =
                endpoints::list_tickets(from, page_limit, &options.sort, options.status.as_deref());
            let body = match enricher.fetch(endpoint).await {
                Ok(body) => body,
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(PullEvent::ListingFailed {
                        from,
                        error: &error,
                    });
                    break;
                }
            };

            let items = items_of(&body);
            if items.is_empty() {
                break;
            }

            for raw in &items {
                let ticket = Ticket::from_raw(raw);
                match options.window.position(ticket.activity_time()) {
                    WindowPosition::Before => break 'paging,
                    WindowPosition::After => continue,
                    WindowPosition::Inside => {}
                }

                let handle = tokio::spawn({
                    let enricher = enricher.clone();
                    let ticket_id = ticket.ticket_id.clone();
                    async move { enricher.fetch_threads(&ticket_id).await }
                });
                pending.push((ticket, handle));

                if options.limit.is_some_and(|limit| pending.len() >= limit) {
                    break 'paging;
                }
            }

            if items.len() < page_limit {
                break;
            }
            from += items.len();
        }

        // Draining
        reporter.report(PullEvent::Draining {
            tickets: pending.len(),
        });
        let mut errors = 0;
        let mut tickets = Vec::with_capacity(pending.len());
        for (position, (mut ticket, handle)) in pending.into_iter().enumerate() {
            match handle.await {
                Ok(outcome) => {
                    errors += outcome.errors;
                    ticket.threads.extend(outcome.threads);
                    reporter.report(PullEvent::TicketEnriched {
                        label: ticket.label(),
                        threads: ticket.threads.len(),
                        position: position + 1,
                        limit: options.limit,
                    });
                }
                Err(e) => {
                    errors += 1;
                    let error = e.to_string();
                    reporter.report(PullEvent::EnrichmentFailed {
                        label: ticket.label(),
                        error: &error,
                    });
                }
            }
            tickets.push(ticket);
        }

        // Writing
        let limiter = enricher.fetcher().limiter();
        let mut written = 0;
        let mut write_failures = 0;
        for ticket in &tickets {
            match sink.write(ticket) {
                Ok(path) => {
                    written += 1;
                    tracing::debug!(path = %path.display(), "Wrote ticket");
                    if written % PROGRESS_EVERY == 0 {
                        reporter.report(PullEvent::Progress {
                            written,
                            total: tickets.len(),
                            remaining_credits: limiter.remaining(),
                        });
                    }
                }
                Err(e) => {
                    write_failures += 1;
                    let error = e.to_string();
                    reporter.report(PullEvent::WriteFailed {
                        label: ticket.label(),
                        error: &error,
                    });
                }
            }
        }

        let result = PullResult {
            tickets: tickets.len(),
            written,
            write_failures,
            api_calls: enricher.fetcher().call_count(),
            errors,
            elapsed: started.elapsed(),
            remaining_credits: limiter.remaining(),
        };
        reporter.report(PullEvent::Finished { result: &result });
        Ok(result)
    }

    /// One normalized listing page, without threads.
    pub async fn list_page(
        &self,
        from: usize,
        limit: usize,
        status: Option<&str>,
    ) -> Result<Vec<Ticket>, AppError> {
        let session = self.session(1, RateLimitConfig::default());
        let body = session
            .fetch(endpoints::list_tickets(from, limit, DEFAULT_SORT, status))
            .await?;
        Ok(items_of(&body).iter().map(Ticket::from_raw).collect())
    }

    /// One ticket with its threads, fetched one call at a time.
    ///
    /// Thread failures degrade as in a pull; only the ticket lookup itself
    /// can fail.
    pub async fn ticket(&self, ticket_id: &str) -> Result<Ticket, AppError> {
        let session = self.session(1, RateLimitConfig::default().with_min_delay(COMMAND_DELAY));
        let body = session.fetch(endpoints::ticket(ticket_id)).await?;
        let mut ticket = Ticket::from_raw(&body);
        let errors = session.enrich(&mut ticket).await;
        if errors > 0 {
            tracing::warn!(%ticket_id, errors, "Some threads could not be fetched in full");
        }
        Ok(ticket)
    }

    /// Total number of tickets, counted by paging through the listing.
    pub async fn count(&self, status: Option<&str>) -> Result<usize, AppError> {
        let session = self.session(1, RateLimitConfig::default().with_min_delay(COMMAND_DELAY));
        let mut total = 0;
        loop {
            let body = session
                .fetch(endpoints::list_tickets(total, PAGE_SIZE, DEFAULT_SORT, status))
                .await?;
            let page = items_of(&body).len();
            total += page;
            tracing::debug!(page, total, "Counted listing page");
            if page < PAGE_SIZE {
                return Ok(total);
            }
        }
    }
}
