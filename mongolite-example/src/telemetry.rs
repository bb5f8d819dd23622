use mongolite::{Database, HookContext, HookOutcome, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters fed by the query hooks.
#[derive(Default)]
pub struct QueryStats {
    queries: AtomicU64,
    documents: AtomicU64,
}

impl QueryStats {
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn documents_seen(&self) -> u64 {
        self.documents.load(Ordering::Relaxed)
    }
}

/// Register a `pre_query`/`post_query` pair that logs every read.
pub fn install(db: &mut Database) -> Result<Arc<QueryStats>> {
    let stats = Arc::new(QueryStats::default());

    let pre = Arc::clone(&stats);
    db.on("pre_query", move |ctx: &mut HookContext| {
        pre.queries.fetch_add(1, Ordering::Relaxed);
        log::info!("query on '{}': {:?}", ctx.collection, ctx.filter);
        Ok(())
    })?;

    let post = Arc::clone(&stats);
    db.on("post_query", move |ctx: &mut HookContext| {
        let returned = match &ctx.outcome {
            Some(HookOutcome::Documents(docs)) => docs.len() as u64,
            Some(HookOutcome::Values(values)) => values.len() as u64,
            Some(HookOutcome::Count(_)) | Some(HookOutcome::Response(_)) | None => 0,
        };
        post.documents.fetch_add(returned, Ordering::Relaxed);
        log::debug!("query on '{}' returned {returned} item(s)", ctx.collection);
        Ok(())
    })?;

    Ok(stats)
}
