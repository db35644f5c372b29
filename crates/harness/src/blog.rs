use nestlog_core::{
    field_value::field_map,
    history::{AssociationStep, HistoryRecord},
    CoreError, Schema,
};

use crate::author::TestAuthor;

/// Blog hierarchy used across the integration tests. `Archive` is a root
/// type with no modifier field configured.
pub const BLOG_SCHEMA_TOML: &str = r#"
roots = ["Blog", "Archive"]

[types.Blog]
modifier_field = "modifier_id"
required = ["title"]

[types.Post]
modifier_field = "updated_by"
required = ["title"]

[types.Setting]
modifier_field = "updated_by"

[types.Comment]
modifier_field = "updated_by"

[[relations]]
host = "Blog"
name = "Posts"
cardinality = "collection"
target = "Post"

[[relations]]
host = "Blog"
name = "Settings"
cardinality = "singular"
target = "Setting"

[[relations]]
host = "Post"
name = "Comments"
cardinality = "collection"
target = "Comment"
"#;

pub fn blog_schema() -> Result<Schema, CoreError> {
    Schema::from_toml_str(BLOG_SCHEMA_TOML)
}

/// A seeded blog with one post, a settings document and a comment on the
/// post, plus the create records captured for each.
pub struct BlogFixture {
    pub author: TestAuthor,
    pub blog: Vec<AssociationStep>,
    pub post: Vec<AssociationStep>,
    pub settings: Vec<AssociationStep>,
    pub comment: Vec<AssociationStep>,
    pub created: Vec<HistoryRecord>,
}

impl BlogFixture {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_author(TestAuthor::new(blog_schema()?)?)
    }

    pub fn with_author(mut author: TestAuthor) -> Result<Self, Box<dyn std::error::Error>> {
        let (blog, blog_rec) =
            author.create_root("Blog", field_map([("title", "Field Notes"), ("slug", "field-notes")]))?;
        let (post, post_rec) =
            author.create_member(&blog, "Posts", field_map([("title", "First"), ("body", "Hello")]))?;
        let (settings, settings_rec) =
            author.create_member(&blog, "Settings", field_map([("theme", "dark")]))?;
        let (comment, comment_rec) =
            author.create_member(&post, "Comments", field_map([("body", "Nice post")]))?;

        Ok(Self {
            author,
            blog,
            post,
            settings,
            comment,
            created: vec![blog_rec, post_rec, settings_rec, comment_rec],
        })
    }
}
