use prometheus::{register_int_counter, IntCounter};

lazy_static! {
    pub static ref MESSAGES_PROCESSED: IntCounter = register_int_counter!(
        "cdn_gateway_messages_processed_total",
        "number of queue messages processed successfully",
    )
    .unwrap();
    pub static ref MESSAGES_FAILED: IntCounter = register_int_counter!(
        "cdn_gateway_messages_failed_total",
        "number of queue messages dropped after exhausting retries",
    )
    .unwrap();
    pub static ref ITEMS_WRITTEN: IntCounter = register_int_counter!(
        "cdn_gateway_items_written_total",
        "number of items written to the CDN metadata table",
    )
    .unwrap();
    pub static ref CACHE_FLUSH_URLS: IntCounter = register_int_counter!(
        "cdn_gateway_cache_flush_urls_total",
        "number of URLs submitted for cache invalidation",
    )
    .unwrap();
}
