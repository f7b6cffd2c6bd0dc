//! Seeding: push the first work item of a workflow onto the request queue.

use anyhow::{anyhow, Result};
use crawlflow_core::model::WorkItem;
use crawlflow_core::tracker::encode_work_item;
use crawlflow_core::WorkflowDefinition;

use crate::queue::{MessageQueue, Outbound, QueueNames};

/// Build the seed item, with an optional URL override.
pub fn seed_item(definition: &WorkflowDefinition, url: Option<&str>) -> Result<WorkItem> {
    let mut item = match (definition.seed_item(), url) {
        (Some(item), _) => item,
        (None, Some(url)) => WorkItem::seed(url).with_headers(definition.default_headers.clone()),
        (None, None) => {
            return Err(anyhow!(
                "workflow '{}' names no seed URL; set the first request step url or taskInfo.baseUrl",
                definition.task_id()
            ))
        }
    };

    if let Some(url) = url {
        item.url = url.to_string();
    }
    Ok(item)
}

/// Publish `item` to the request queue.
pub async fn publish_seed<Q: MessageQueue>(queue: &Q, names: &QueueNames, item: &WorkItem) -> Result<()> {
    let outbound = Outbound {
        subject: names.requests.clone(),
        msg_id: format!("seed-{}", uuid::Uuid::new_v4()),
        payload: encode_work_item(item)?,
    };
    queue.publish_batch(&[outbound]).await?;

    tracing::info!(url = %item.url, subject = %names.requests, "Seed work item published");
    Ok(())
}
