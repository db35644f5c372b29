use nestlog_core::{
    field_value::{field_map, FieldMap, FieldValue},
    history::{Action, AssociationStep, HistoryRecord},
    identity::ActorIdentity,
    ids::{DocumentId, RecordId, Signature},
    CoreError,
};
use nestlog_engine::{Engine, EngineError, Outcome};
use nestlog_harness::{blog_schema, init_tracing, BlogFixture, TestAuthor};
use nestlog_storage::{DocumentStore, SqliteDocumentStore};

fn last_id(chain: &[AssociationStep]) -> Option<DocumentId> {
    chain.last().and_then(|step| step.id)
}

fn text<'a>(fields: &'a FieldMap, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(FieldValue::as_text)
}

// ============================================================================
// Update round trips
// ============================================================================

#[test]
fn undo_then_redo_restores_update() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = fx.author.update(
        &fx.post,
        field_map([("title", "Second"), ("tagline", "fresh")]),
    )?;
    assert_eq!(rec.original, field_map([("title", "First")]));

    let outcome = fx.author.undo(&rec)?;
    assert!(matches!(outcome, Outcome::Updated { .. }));
    let post = fx.author.locate(&fx.post)?.ok_or("post should resolve")?;
    assert_eq!(text(&post.fields, "title"), Some("First"));
    assert!(post.fields["tagline"].is_null());
    assert_eq!(text(&post.fields, "body"), Some("Hello"));
    assert_eq!(post.fields["updated_by"].as_actor(), Some(fx.author.actor_id()));

    fx.author.redo(&rec)?;
    let post = fx.author.locate(&fx.post)?.ok_or("post should resolve")?;
    assert_eq!(text(&post.fields, "title"), Some("Second"));
    assert_eq!(text(&post.fields, "tagline"), Some("fresh"));
    assert_eq!(text(&post.fields, "body"), Some("Hello"));
    Ok(())
}

#[test]
fn redo_then_undo_restores_update() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = fx.author.update(&fx.blog, field_map([("title", "Renamed")]))?;

    fx.author.redo(&rec)?;
    let blog = fx.author.locate(&fx.blog)?.ok_or("blog should resolve")?;
    assert_eq!(text(&blog.fields, "title"), Some("Renamed"));

    fx.author.undo(&rec)?;
    let blog = fx.author.locate(&fx.blog)?.ok_or("blog should resolve")?;
    assert_eq!(text(&blog.fields, "title"), Some("Field Notes"));
    assert_eq!(text(&blog.fields, "slug"), Some("field-notes"));
    assert_eq!(blog.fields["modifier_id"].as_actor(), Some(fx.author.actor_id()));
    Ok(())
}

#[test]
fn undo_and_redo_attributes_share_keys() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = fx.author.update(
        &fx.post,
        field_map([("title", "Second"), ("tagline", "fresh")]),
    )?;
    let modifier = ActorIdentity::generate().actor_id();

    let undo = fx.author.engine.undo_attributes(&rec, modifier)?;
    let redo = fx.author.engine.redo_attributes(&rec, modifier)?;
    let undo_keys: Vec<&str> = undo.keys().map(String::as_str).collect();
    let redo_keys: Vec<&str> = redo.keys().map(String::as_str).collect();
    assert_eq!(undo_keys, vec!["tagline", "title", "updated_by"]);
    assert_eq!(undo_keys, redo_keys);

    assert_eq!(text(&undo, "title"), Some("First"));
    assert_eq!(text(&redo, "title"), Some("Second"));
    assert_eq!(undo["updated_by"].as_actor(), Some(modifier));

    // Computing attributes leaves the document alone.
    let post = fx.author.locate(&fx.post)?.ok_or("post should resolve")?;
    assert_eq!(text(&post.fields, "title"), Some("Second"));
    Ok(())
}

#[test]
fn singular_document_update_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let mut chain = fx.blog.clone();
    chain.push(AssociationStep::singular("Settings"));
    let rec = fx.author.update(&chain, field_map([("theme", "light")]))?;

    let outcome = fx.author.undo(&rec)?;
    let Outcome::Updated { doc_id, .. } = &outcome else {
        return Err(format!("expected field update, got {outcome:?}").into());
    };
    assert_eq!(Some(*doc_id), last_id(&fx.settings));
    let settings = fx.author.locate(&fx.settings)?.ok_or("settings should resolve")?;
    assert_eq!(text(&settings.fields, "theme"), Some("dark"));
    Ok(())
}

#[test]
fn undo_all_unwinds_newest_first() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let first = fx.author.update(&fx.post, field_map([("title", "A")]))?;
    let second = fx.author.update(&fx.post, field_map([("title", "B")]))?;
    let third = fx.author.update(&fx.post, field_map([("title", "C")]))?;

    let modifier = fx.author.actor_id();
    let outcomes = fx
        .author
        .engine
        .undo_all(&[first, third, second], modifier)?;
    assert_eq!(outcomes.len(), 3);

    let post = fx.author.locate(&fx.post)?.ok_or("post should resolve")?;
    assert_eq!(text(&post.fields, "title"), Some("First"));
    Ok(())
}

// ============================================================================
// Create and destroy
// ============================================================================

#[test]
fn undo_create_then_redo_brings_document_back() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = fx.created[1].clone();
    let post_id = last_id(&fx.post).ok_or("post chain has an id")?;

    assert_eq!(fx.author.undo(&rec)?, Outcome::Destroyed { doc_id: post_id });
    assert!(fx.author.locate(&fx.post)?.is_none());
    assert!(fx.author.locate(&fx.comment)?.is_none());

    assert_eq!(fx.author.redo(&rec)?, Outcome::Recreated { doc_id: post_id });
    let post = fx.author.locate(&fx.post)?.ok_or("post should resolve")?;
    assert_eq!(post.fields, rec.modified);
    Ok(())
}

#[test]
fn undo_create_twice_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = fx.created[3].clone();

    assert!(matches!(fx.author.undo(&rec)?, Outcome::Destroyed { .. }));
    assert_eq!(fx.author.undo(&rec)?, Outcome::AlreadyAbsent);
    Ok(())
}

#[test]
fn undo_destroy_then_redo_removes_it_again() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = fx.author.destroy(&fx.post)?;
    assert_eq!(rec.original, field_map([("title", "First"), ("body", "Hello")]));

    assert!(matches!(fx.author.undo(&rec)?, Outcome::Recreated { .. }));
    let post = fx.author.locate(&fx.post)?.ok_or("post should resolve")?;
    assert_eq!(post.fields, rec.original);

    assert!(matches!(fx.author.redo(&rec)?, Outcome::Destroyed { .. }));
    assert!(fx.author.locate(&fx.post)?.is_none());
    assert_eq!(fx.author.redo(&rec)?, Outcome::AlreadyAbsent);
    Ok(())
}

#[test]
fn undo_create_of_missing_post_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let mut chain = fx.blog.clone();
    chain.push(AssociationStep::new("Posts", DocumentId::new()));
    let rec = HistoryRecord::new_signed(
        &fx.author.identity,
        Action::Create,
        chain,
        FieldMap::new(),
        field_map([("title", "Gone")]),
        99,
    )?;

    let before = fx.author.engine.store().document_count()?;
    assert_eq!(fx.author.undo(&rec)?, Outcome::AlreadyAbsent);
    assert_eq!(fx.author.engine.store().document_count()?, before);
    Ok(())
}

#[test]
fn standalone_destroy_undo_creates_root() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = Engine::new(blog_schema()?, SqliteDocumentStore::open_in_memory()?);
    let blog_id = DocumentId::new();
    let rec = HistoryRecord {
        record_id: RecordId::new(),
        association_chain: vec![AssociationStep::new("Blog", blog_id)],
        original: FieldMap::new(),
        modified: field_map([("title", "Hello")]),
        action: Action::Destroy,
        modifier: ActorIdentity::generate().actor_id(),
        version: 1,
        scope: "Blog".into(),
        created_at: 0,
        signature: Signature::from_bytes([0u8; 64]),
    };

    let outcome = engine.undo(&rec, ActorIdentity::generate().actor_id())?;
    assert_eq!(outcome, Outcome::Recreated { doc_id: blog_id });
    let blog = engine.store().get_document(blog_id)?.ok_or("blog should exist")?;
    assert!(blog.is_root());
    assert_eq!(blog.doc_type, "Blog");
    assert_eq!(text(&blog.fields, "title"), Some("Hello"));
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn undo_clearing_required_field_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = HistoryRecord::new_signed(
        &fx.author.identity,
        Action::Update,
        fx.blog.clone(),
        field_map([("title", FieldValue::Null)]),
        field_map([("title", "Field Notes")]),
        99,
    )?;

    let modifier = fx.author.actor_id();
    let result = fx.author.engine.undo(&rec, modifier);
    assert!(matches!(result, Err(EngineError::Validation(_))));
    let blog = fx.author.locate(&fx.blog)?.ok_or("blog should resolve")?;
    assert_eq!(text(&blog.fields, "title"), Some("Field Notes"));
    assert!(!blog.fields.contains_key("modifier_id"));
    Ok(())
}

#[test]
fn recreating_a_live_document_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = HistoryRecord::new_signed(
        &fx.author.identity,
        Action::Destroy,
        fx.post.clone(),
        field_map([("title", "First")]),
        FieldMap::new(),
        99,
    )?;

    let modifier = fx.author.actor_id();
    let result = fx.author.engine.undo(&rec, modifier);
    assert!(matches!(result, Err(EngineError::Validation(_))));
    Ok(())
}

#[test]
fn untracked_type_is_a_schema_error() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut author = TestAuthor::new(blog_schema()?)?;
    let (archive, _) = author.create_root("Archive", field_map([("year", "2019")]))?;
    let rec = author.update(&archive, field_map([("year", "2020")]))?;

    let result = author.undo(&rec);
    let err = result.err().ok_or("undo should fail")?;
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::SchemaConfiguration { doc_type }) if doc_type == "Archive"
    ));
    let doc = author.locate(&archive)?.ok_or("archive should resolve")?;
    assert_eq!(text(&doc.fields, "year"), Some("2020"));
    Ok(())
}

#[test]
fn update_of_missing_document_is_a_gap() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let rec = fx.author.update(&fx.comment, field_map([("body", "Edited")]))?;
    fx.author.destroy(&fx.post)?;

    let modifier = fx.author.actor_id();
    let result = fx.author.engine.undo(&rec, modifier);
    assert!(matches!(
        result,
        Err(EngineError::ResolutionGap { step: 1, ref name }) if name == "Posts"
    ));
    Ok(())
}

#[test]
fn tampered_record_fails_signature_check() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut fx = BlogFixture::new()?;
    let mut rec = fx.author.update(&fx.post, field_map([("title", "Second")]))?;
    rec.original = field_map([("title", "Forged")]);

    let modifier = fx.author.actor_id();
    let result = fx.author.engine.undo(&rec, modifier);
    assert!(matches!(
        result,
        Err(EngineError::Core(CoreError::InvalidSignature))
    ));
    let post = fx.author.locate(&fx.post)?.ok_or("post should resolve")?;
    assert_eq!(text(&post.fields, "title"), Some("Second"));
    Ok(())
}

// ============================================================================
// File-backed store
// ============================================================================

#[test]
fn records_apply_after_reopening_store() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blog.db");
    let path = path.to_str().ok_or("temp path is not utf-8")?;

    let (chain, rec) = {
        let mut author = TestAuthor::with_store(blog_schema()?, SqliteDocumentStore::open(path)?)?;
        let (chain, _) = author.create_root("Blog", field_map([("title", "Draft")]))?;
        let rec = author.update(&chain, field_map([("title", "Published")]))?;
        (chain, rec)
    };

    let mut author = TestAuthor::with_store(blog_schema()?, SqliteDocumentStore::open(path)?)?;
    author.undo(&rec)?;
    let blog = author.locate(&chain)?.ok_or("blog should resolve")?;
    assert_eq!(text(&blog.fields, "title"), Some("Draft"));
    Ok(())
}
