//! `history`, `export`, `import` and `clear` over the stored conversation.

use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::core::config::data::path_display;
use crate::core::sanitize::escape_terminal;
use crate::core::store::MessageStore;

pub fn print_history(store: &MessageStore) -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout().lock();
    write_history(store, &mut stdout)?;
    Ok(())
}

fn write_history(store: &MessageStore, out: &mut impl Write) -> io::Result<()> {
    if store.is_empty() {
        writeln!(out, "(no messages)")?;
        return Ok(());
    }
    for message in store.messages() {
        if message.is_assistant() && message.content.is_empty() {
            continue;
        }
        writeln!(
            out,
            "[{}] {}: {}",
            message.created_at.format("%Y-%m-%d %H:%M"),
            message.role.label(),
            escape_terminal(&message.content)
        )?;
        writeln!(out)?;
    }
    Ok(())
}

pub fn export_history(store: &MessageStore, path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let document = store.export_messages()?;
    let Some(path) = path else {
        println!("{document}");
        return Ok(());
    };

    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    let mut temp_file = match parent {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new_in(".")?,
    };
    temp_file.write_all(document.as_bytes())?;
    temp_file.as_file_mut().sync_all()?;
    temp_file
        .persist(path)
        .map_err(|err| -> Box<dyn Error> { Box::new(err) })?;

    eprintln!(
        "✅ Exported {} messages to {}",
        store.len(),
        path_display(path)
    );
    Ok(())
}

pub fn import_history(store: &mut MessageStore, path: &Path) -> Result<(), Box<dyn Error>> {
    let document = fs::read_to_string(path)?;
    let summary = store.import_messages(&document)?;
    if summary.skipped > 0 {
        eprintln!(
            "⚠️  Imported {} messages, skipped {} invalid entries",
            summary.imported, summary.skipped
        );
    } else {
        eprintln!("✅ Imported {} messages", summary.imported);
    }
    Ok(())
}

pub fn clear_history(store: &mut MessageStore) {
    store.clear_messages();
    eprintln!("✅ Conversation cleared");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::StoreLimits;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn history_lists_turns_with_speaker_labels() {
        let mut store = MessageStore::default();
        store.add_user_message("What is 2+2?");
        store.add_assistant_message(&json!({"response": "4"}));
        store.begin_assistant_message();

        let mut out = Vec::new();
        write_history(&store, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("You: What is 2+2?"));
        assert!(text.contains("Assistant: 4"));
        assert_eq!(text.matches("Assistant:").count(), 1);
    }

    #[test]
    fn empty_history_says_so() {
        let mut out = Vec::new();
        write_history(&MessageStore::default(), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "(no messages)\n");
    }

    #[test]
    fn export_file_imports_back() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("conversation.json");

        let mut store = MessageStore::default();
        store.add_user_message("hello");
        store.add_assistant_message(&json!({"response": "hi"}));
        export_history(&store, Some(&path)).unwrap();

        let mut restored = MessageStore::new(StoreLimits::default());
        import_history(&mut restored, &path).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.messages()[1].content, "hi");
    }

    #[test]
    fn import_of_missing_file_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut store = MessageStore::default();
        assert!(import_history(&mut store, &temp_dir.path().join("absent.json")).is_err());
    }
}
