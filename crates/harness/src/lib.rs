pub mod author;
pub mod blog;

pub use author::TestAuthor;
pub use blog::{blog_schema, BlogFixture, BLOG_SCHEMA_TOML};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Route engine tracing to the test writer. Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .try_init();
    });
}
