//! Record command handlers

use std::io::Read;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

use fieldsync_core::{Collection, ReadFilter, Record};

use crate::engine::Engine;
use crate::output::Output;

/// List records of a collection, optionally through a secondary index
pub async fn list(
    engine: &Engine,
    collection: Collection,
    index: Option<(String, String)>,
    output: &Output,
) -> Result<()> {
    let filter = match index {
        Some((name, raw)) => ReadFilter::ByIndex {
            index: name,
            value: parse_value(&raw),
        },
        None => ReadFilter::All,
    };

    let records = engine
        .repository(collection)
        .read(&filter)
        .await
        .with_context(|| format!("Failed to read {}", collection))?;

    output.print_records(&records);
    Ok(())
}

/// Show a single record
pub async fn get(engine: &Engine, collection: Collection, id: String, output: &Output) -> Result<()> {
    let record = engine
        .repository(collection)
        .get(&id)
        .await?
        .ok_or_else(|| anyhow!("Record not found: {}/{}", collection, id))?;

    output.print_record(&record);
    Ok(())
}

/// Create a record from JSON
pub async fn create(
    engine: &Engine,
    collection: Collection,
    data: String,
    output: &Output,
) -> Result<()> {
    let record = parse_record(&data)?;
    let created = engine
        .repository(collection)
        .create(record)
        .await
        .with_context(|| format!("Failed to create record in {}", collection))?;

    output.success(&format!(
        "Created {}/{}",
        collection,
        created.id().unwrap_or_default()
    ));
    output.print_record(&created);
    Ok(())
}

/// Update a record
///
/// Fields given in `data` are merged into the cached copy unless `replace`
/// is set, in which case `data` becomes the whole record.
pub async fn update(
    engine: &Engine,
    collection: Collection,
    id: String,
    data: String,
    replace: bool,
    output: &Output,
) -> Result<()> {
    let changes = parse_record(&data)?;
    if let Some(other) = changes.id() {
        if other != id {
            bail!("Record body has id '{}' but '{}' was given", other, id);
        }
    }

    let repo = engine.repository(collection);
    let mut record = if replace {
        Record::with_id(id.as_str())
    } else {
        repo.get(&id)
            .await?
            .ok_or_else(|| anyhow!("Record not found: {}/{} (use --replace to send it anyway)", collection, id))?
    };
    for (key, value) in changes.as_map() {
        record.set(key.as_str(), value.clone());
    }

    let updated = repo
        .update(record)
        .await
        .with_context(|| format!("Failed to update {}/{}", collection, id))?;

    output.success(&format!("Updated {}/{}", collection, id));
    output.print_record(&updated);
    Ok(())
}

/// Delete a record
pub async fn delete(engine: &Engine, collection: Collection, id: String, output: &Output) -> Result<()> {
    engine
        .repository(collection)
        .delete(&id)
        .await
        .with_context(|| format!("Failed to delete {}/{}", collection, id))?;

    output.success(&format!("Deleted {}/{}", collection, id));
    Ok(())
}

/// Forget cached offline data for one collection or all of them
pub fn forget(engine: &Engine, collection: Option<Collection>, output: &Output) -> Result<()> {
    let targets: Vec<Collection> = match collection {
        Some(collection) => vec![collection],
        None => Collection::ALL.to_vec(),
    };

    for target in &targets {
        engine
            .repository(*target)
            .forget()
            .with_context(|| format!("Failed to forget {}", target))?;
    }

    let names: Vec<_> = targets.iter().map(|c| c.as_str()).collect();
    output.success(&format!("Forgot offline data for {}", names.join(", ")));
    Ok(())
}

/// Parse a record body; `-` reads it from stdin
fn parse_record(data: &str) -> Result<Record> {
    let text = if data == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read record from stdin")?;
        buffer
    } else {
        data.to_string()
    };

    let value: Value = serde_json::from_str(&text).context("Record must be valid JSON")?;
    Record::from_value(value).ok_or_else(|| anyhow!("Record must be a JSON object"))
}

/// Index values are JSON when they parse as JSON, plain strings otherwise
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use fieldsync_core::Config;

    fn test_engine(temp_dir: &TempDir) -> Engine {
        Engine::open(Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        })
        .unwrap()
    }

    fn quiet() -> Output {
        Output::new(crate::output::OutputFormat::Quiet)
    }

    #[test]
    fn test_parse_record() {
        let record = parse_record(r#"{"id": "f1", "name": "North Plot"}"#).unwrap();
        assert_eq!(record.id().as_deref(), Some("f1"));

        assert!(parse_record("[1, 2]").is_err());
        assert!(parse_record("{not json").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("c1"), json!("c1"));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("\"42\""), json!("42"));
    }

    #[tokio::test]
    async fn test_update_merges_into_cached_record() {
        let temp_dir = TempDir::new().unwrap();
        let engine = test_engine(&temp_dir);

        create(
            &engine,
            Collection::Fields,
            r#"{"id": "f1", "name": "North", "area": 12}"#.to_string(),
            &quiet(),
        )
        .await
        .unwrap();
        update(
            &engine,
            Collection::Fields,
            "f1".to_string(),
            r#"{"name": "North Plot"}"#.to_string(),
            false,
            &quiet(),
        )
        .await
        .unwrap();

        let record = engine
            .repository(Collection::Fields)
            .get("f1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.get("name").unwrap(), "North Plot");
        assert_eq!(record.get("area").unwrap(), 12);
    }

    #[tokio::test]
    async fn test_update_rejects_mismatched_id() {
        let temp_dir = TempDir::new().unwrap();
        let engine = test_engine(&temp_dir);

        let err = update(
            &engine,
            Collection::Fields,
            "f1".to_string(),
            r#"{"id": "f2"}"#.to_string(),
            true,
            &quiet(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("f2"));
    }

    #[tokio::test]
    async fn test_forget_all_keeps_queue() {
        let temp_dir = TempDir::new().unwrap();
        let engine = test_engine(&temp_dir);

        create(
            &engine,
            Collection::Personnel,
            r#"{"id": "p1"}"#.to_string(),
            &quiet(),
        )
        .await
        .unwrap();
        forget(&engine, None, &quiet()).unwrap();

        let store = engine.sync.store();
        assert!(store.get_all(Collection::Personnel).unwrap().is_empty());
        assert_eq!(engine.sync.queue().pending_count().unwrap(), 1);
    }
}
