use mongolite::{
    Database, DatabaseConfig, Document, FieldType, FieldTypes, Filter, MemoryDriver, Schema,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

mod telemetry;

const BLOG_SCHEMAS: &str = r#"
schemas:
  - name: Post
    collection: posts
    fields:
      - name: title
        type: title
        required: true
      - name: body
        type: content
        default: ""
      - name: tags
        type: list
        items: string
      - name: rating
        type: rating
"#;

#[derive(Debug, Deserialize)]
struct User {
    name: String,
    email: String,
    age: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = DatabaseConfig::from_env()?;
    log::info!("Starting mongolite walkthrough for database '{}'", config.name);

    let mut db = Database::with_config(Arc::new(MemoryDriver::new()), config);

    db.register_schema(
        Schema::builder("User")
            .collection("users")
            .required("name", FieldTypes::name())
            .required("email", FieldTypes::email())
            .required("age", FieldTypes::age())
            .optional("hobbies", FieldType::list(FieldType::string()))
            .build()?,
    )?;
    let loaded = db.register_schemas_yaml(BLOG_SCHEMAS)?;
    log::info!("Loaded {loaded} schema(s) from YAML");

    let stats = telemetry::install(&mut db)?;
    let users = db.collection("User")?;

    // ── Inserts ──
    let rejected = users
        .insert(json!({"name": "", "email": "not-an-email", "age": -5}))
        .await?;
    println!("invalid insert -> {}", rejected.message());
    if let Some(error) = rejected.error() {
        for issue in &error.issues {
            println!("  {}: {}", issue.field, issue.message);
        }
    }

    let alice = users
        .insert(json!({"name": "Alice", "email": "alice@example.com", "age": 28, "hobbies": ["reading", "coding"]}))
        .await?;
    println!("valid insert -> count={} ids={:?}", alice.count(), alice.ids());

    let batch = users
        .insert_many(&[
            json!({"name": "Bob", "email": "bob@example.com", "age": "35", "hobbies": ["gaming"]}),
            json!({"name": "Carol", "email": "carol@example.com", "age": 42, "hobbies": ["coding", "chess"]}),
            json!({"name": "Dave", "email": "dave@example.com", "age": 29}),
        ])
        .await?;
    println!("batch insert -> {}", batch.message());

    // ── Queries ──
    let over_thirty = users.find_where(&json!({"age__gte": 30}))?.sort("age");
    for doc in over_thirty.to_list().await?.iter() {
        let user: User = serde_json::from_value(Value::Object(doc.clone()))?;
        println!("age >= 30: {} <{}> ({})", user.name, user.email, user.age);
    }

    let coders = users
        .find(Filter::field("hobbies__contains", "coding")?)
        .project(&["name"])
        .to_list()
        .await?;
    println!("coders: {:?}", names(&coders));

    let page = users.find_all().sort("-age").skip(1).limit(2).to_list().await?;
    println!("page 2 by age desc: {:?}", names(&page));

    let youngest = users.find_all().sort("age").first().await?;
    if let Some(doc) = youngest.value {
        println!("youngest: {}", doc["name"]);
    }

    if let Err(e) = users.find_where(&json!({"name__like": "A%"})) {
        println!("unknown operators fail fast: {e}");
    }

    println!(
        "hobbies in use: {:?}",
        users.find_all().distinct("hobbies").await?.value
    );

    // ── Updates and deletes ──
    let birthday = users
        .update(&Filter::field("name", "Alice")?, &json!({"$inc": {"age": 1}}))
        .await?;
    println!("birthday -> {}", birthday.message());

    let renamed = users
        .update_one(&Filter::field("name", "Bob")?, &json!({"name": "Robert"}))
        .await?;
    println!("rename Bob -> {}", renamed.message());

    let removed = users.delete(&Filter::field("age__lt", 30)?).await?;
    println!("delete age < 30 -> count={}", removed.count());

    // ── Blocking variants ──
    let posts = db.collection("posts")?;
    let created = posts.insert_sync(json!({"title": "Hello", "tags": ["intro"], "rating": 4.5}))?;
    println!("sync insert -> {}", created.message());
    let total = posts.find_all().count_sync()?;
    println!("posts: {}", *total);

    println!(
        "telemetry: {} queries, {} documents returned",
        stats.queries(),
        stats.documents_seen()
    );
    Ok(())
}

fn names(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .filter_map(|d| d.get("name").and_then(Value::as_str).map(String::from))
        .collect()
}
