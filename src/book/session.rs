//! Buffers newly written book entries per play session and commits them to disk on game save.
//!
//! Committed entries live inside the book's own text file as tagged blocks:
//!
//! ```text
//! ;;SAVE_BLOCK ID="Save12_Bob_Riften" TIMELINE="2024-03-01_18-22-10" PARENT="Save11_Bob_Whiterun";;
//! entry text...
//! ;;END_SAVE_DATA;;
//! ```
//!
//! Blocks are append-only and never rewritten. Which blocks are visible for a given playthrough
//! is decided at read time by walking the save's ancestor chain through the master history log,
//! so entries written on an abandoned save branch stay in the file but never show up again.

use std::{
    collections::{HashMap, HashSet},
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use eyre::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use super::mapping::MappingTable;

const SAVE_BLOCK_PREFIX: &str = ";;SAVE_BLOCK ";
const SAVE_BLOCK_END: &str = ";;END_SAVE_DATA;;";

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bID="([^"]*)""#).unwrap());
static PARENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bPARENT="([^"]*)""#).unwrap());

/// Pulls a quoted tag value out of a header or history line. A missing or unterminated tag just
/// yields an empty string; corrupt lines must not take the whole book down.
fn parse_tag(line: &str, pattern: &Regex) -> String {
    pattern
        .captures(line)
        .map(|captures| captures[1].to_string())
        .unwrap_or_default()
}

/// Save identifiers arrive from the game both with and without their file extension. Two
/// identifiers name the same save iff their stripped forms are equal.
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(index) => &name[..index],
        None => name,
    }
}

/// The game names saves `Save01_CharacterName_Location...`; the segment between the first two
/// underscores identifies the character. Fragile, but it's the only identity the save name gives
/// us.
fn character_identity(identifier: &str) -> &str {
    let Some(first) = identifier.find('_') else {
        return "";
    };

    let rest = &identifier[first + 1..];

    match rest.find('_') {
        Some(second) => &rest[..second],
        None => "",
    }
}

fn timeline_token() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

enum Chunk {
    /// A run of literal text from the file.
    Static(String),

    /// A placeholder for the save block with this identifier.
    Block(String),
}

fn parse_chunks(text: &str) -> (Vec<Chunk>, HashMap<String, String>) {
    let mut layout = Vec::new();
    let mut blocks = HashMap::new();

    let mut static_buf = String::new();
    let mut block_buf = String::new();
    let mut current_id = String::new();
    let mut in_block = false;

    for line in text.lines() {
        if line.starts_with(SAVE_BLOCK_PREFIX) {
            if !static_buf.is_empty() {
                layout.push(Chunk::Static(std::mem::take(&mut static_buf)));
            }

            in_block = true;
            current_id = parse_tag(line, &ID_PATTERN);
            layout.push(Chunk::Block(current_id.clone()));
            block_buf.clear();
        } else if line.starts_with(SAVE_BLOCK_END) {
            if in_block {
                blocks.insert(current_id.clone(), std::mem::take(&mut block_buf));
            }

            in_block = false;
        } else if in_block {
            block_buf.push_str(line);
            block_buf.push('\n');
        } else {
            static_buf.push_str(line);
            static_buf.push('\n');
        }
    }

    // A block missing its end marker is treated as unreadable; its text is dropped rather than
    // leaking into the static layout.
    if !static_buf.is_empty() {
        layout.push(Chunk::Static(static_buf));
    }

    (layout, blocks)
}

/// Session state for the current playthrough plus the commit/reconstruction logic.
///
/// This is a plain service object: the composition root in [`crate::book`] owns the shared
/// instance behind a mutex, and tests construct their own with a scratch history log.
pub struct SessionStore {
    history_path: PathBuf,

    current_save: String,
    parent_save: String,
    timeline_id: String,

    /// Entries written this session but not yet committed by a save, per book key.
    pending: HashMap<String, Vec<String>>,
}

impl SessionStore {
    pub fn new(history_path: PathBuf) -> SessionStore {
        SessionStore {
            history_path,
            current_save: String::new(),
            parent_save: String::new(),
            timeline_id: String::new(),
            pending: HashMap::new(),
        }
    }

    pub fn current_save_identifier(&self) -> &str {
        &self.current_save
    }

    /// Called when the game loads a save (or starts a new game, or reaches the main menu with a
    /// sentinel identifier).
    pub fn on_load(&mut self, save_identifier: &str) {
        let clean = strip_extension(save_identifier).to_string();

        let new_character = character_identity(&clean).to_string();
        let old_character = character_identity(&self.current_save).to_string();

        // A different character means a different play history, so the timeline token has to
        // change. Otherwise keep it, generating one the first time through.
        if !self.current_save.is_empty() && !new_character.is_empty() && new_character != old_character
        {
            self.timeline_id = timeline_token();
        } else if self.timeline_id.is_empty() {
            self.timeline_id = timeline_token();
        }

        self.current_save = clean.clone();
        self.parent_save = clean;

        // Entries that were never committed belong to no save; they do not survive a load.
        self.pending.clear();

        log::info!(
            "session loaded: save '{}', timeline '{}'",
            self.current_save,
            self.timeline_id
        );
    }

    /// Adds `text` to the in-memory buffer for `key`. Never fails; with no active session the
    /// entry is buffered anyway and a warning logged.
    pub fn append_entry(&mut self, key: &str, text: &str) {
        if self.current_save.is_empty() {
            log::warn!("append_entry: no save identifier set; buffering entry for '{key}' anyway");
        }

        let entries = self.pending.entry(key.to_string()).or_default();
        entries.push(text.to_string());

        log::info!(
            "appended entry for key '{}'; {} now pending for this key",
            key,
            entries.len()
        );
    }

    /// Called when the game writes a save. Commits every pending entry to its book file as a
    /// tagged block, records the save in the master history log, and rolls the session forward so
    /// the new save is both current and parent.
    pub fn on_save(&mut self, new_save_identifier: &str, mapping: &MappingTable) {
        let clean_new = strip_extension(new_save_identifier).to_string();
        let clean_parent = strip_extension(&self.parent_save).to_string();

        // The history log gets a record for every save, even one with nothing pending; lineage
        // has to be reconstructible for saves that never touched a book.
        if let Err(err) = self.append_history_record(&clean_new, &clean_parent) {
            log::error!(
                "failed to append to history log {}: {:?}",
                self.history_path.display(),
                err
            );
        }

        for (key, entries) in &self.pending {
            if entries.is_empty() {
                continue;
            }

            let path = match mapping.resolve(key) {
                Some(path) => path,

                None => {
                    log::warn!("pending entries for '{key}' have no mapped file; dropping them");
                    continue;
                }
            };

            match append_save_block(&path, &clean_new, &self.timeline_id, &clean_parent, entries) {
                Ok(()) => log::info!(
                    "committed {} entr(y/ies) for '{}' under save '{}'",
                    entries.len(),
                    key,
                    clean_new
                ),

                Err(err) => log::error!("failed to write save block to {}: {:?}", path.display(), err),
            }
        }

        self.parent_save = clean_new.clone();
        self.current_save = clean_new;
        self.pending.clear();
    }

    /// Reconstructs the full logical content for `key` as seen from the current save: static text
    /// in file order, committed blocks belonging to the current save's ancestor chain, and any
    /// still-pending entries at the end.
    pub fn full_content(&self, key: &str, mapping: &MappingTable) -> String {
        let mut content = match mapping.resolve(key) {
            Some(path) => self.assemble_from_file(&path),

            // Not a mapped book (or not yet); pending entries are all there is.
            None => String::new(),
        };

        if let Some(entries) = self.pending.get(key) {
            if !entries.is_empty() {
                if !content.is_empty() {
                    content.push('\n');
                }

                for entry in entries {
                    content.push_str(entry);
                    content.push('\n');
                }
            }
        }

        content
    }

    fn assemble_from_file(&self, path: &Path) -> String {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,

            Err(err) => {
                // Missing file just means no persisted content yet.
                log::info!("no readable content at {}: {}", path.display(), err);
                return String::new();
            }
        };

        let (layout, blocks) = parse_chunks(&text);
        let valid = self.valid_save_ids();

        let mut out = String::new();

        for chunk in layout {
            match chunk {
                Chunk::Static(text) => out.push_str(&text),

                Chunk::Block(id) => {
                    if valid.contains(&id) {
                        if let Some(text) = blocks.get(&id) {
                            out.push_str(text);
                        }
                    }
                }
            }
        }

        out
    }

    /// Walks parent links back from the current save through the history log. The walk tolerates
    /// corrupt history: an empty, repeated or unknown identifier ends the chain.
    fn valid_save_ids(&self) -> HashSet<String> {
        let mut valid = HashSet::new();

        let history = std::fs::read_to_string(&self.history_path).unwrap_or_default();

        let mut tracer = strip_extension(&self.current_save).to_string();

        while !tracer.is_empty() && !valid.contains(&tracer) {
            valid.insert(tracer.clone());

            let parent = history
                .lines()
                .find(|line| parse_tag(line, &ID_PATTERN) == tracer)
                .map(|line| strip_extension(&parse_tag(line, &PARENT_PATTERN)).to_string());

            match parent {
                Some(parent) => tracer = parent,
                None => break,
            }
        }

        valid
    }

    fn append_history_record(&self, save_id: &str, parent_id: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)?;

        writeln!(
            file,
            r#"ID="{}" TIMELINE="{}" PARENT="{}""#,
            save_id, self.timeline_id, parent_id
        )?;

        Ok(())
    }
}

fn append_save_block(
    path: &Path,
    save_id: &str,
    timeline_id: &str,
    parent_id: &str,
    entries: &[String],
) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    write!(
        file,
        "\n{}ID=\"{}\" TIMELINE=\"{}\" PARENT=\"{}\";;\n",
        SAVE_BLOCK_PREFIX, save_id, timeline_id, parent_id
    )?;

    for entry in entries {
        writeln!(file, "{entry}")?;
    }

    writeln!(file, "{SAVE_BLOCK_END}")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
        mapping: MappingTable,
    }

    impl Fixture {
        /// A scratch folder with one mapped book, "Diary" -> diary.txt.
        fn new() -> Fixture {
            let dir = tempfile::tempdir().unwrap();

            std::fs::write(
                dir.path().join("books.ini"),
                "[Books]\nDiary = diary.txt\n",
            )
            .unwrap();

            let mut mapping = MappingTable::new();
            mapping.load(dir.path(), dir.path());

            Fixture { dir, mapping }
        }

        fn store(&self) -> SessionStore {
            SessionStore::new(self.dir.path().join("history.log"))
        }

        fn diary_path(&self) -> PathBuf {
            self.dir.path().join("diary.txt")
        }
    }

    #[test]
    fn extension_stripping_equivalence() {
        let fixture = Fixture::new();

        let mut a = fixture.store();
        a.on_load("Save01_Bob_Timeline.ess");

        let mut b = fixture.store();
        b.on_load("Save01_Bob_Timeline");

        assert_eq!(a.current_save_identifier(), b.current_save_identifier());
        assert_eq!(a.current_save_identifier(), "Save01_Bob_Timeline");
    }

    #[test]
    fn load_is_idempotent_and_always_clears_pending() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        store.on_load("Save01_Bob_Riften");
        store.append_entry("Diary", "will be discarded");
        store.on_load("Save01_Bob_Riften");

        assert_eq!(store.current_save_identifier(), "Save01_Bob_Riften");
        assert!(store.pending.is_empty());

        store.on_load("Save01_Bob_Riften");
        assert_eq!(store.current_save_identifier(), "Save01_Bob_Riften");
        assert!(store.pending.is_empty());
    }

    #[test]
    fn same_character_keeps_timeline_id() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        store.on_load("Save01_Bob_Riften");
        let timeline = store.timeline_id.clone();
        assert!(!timeline.is_empty());

        store.on_load("Save02_Bob_Whiterun");
        assert_eq!(store.timeline_id, timeline);
    }

    #[test]
    fn pending_entries_are_visible_before_any_save() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        store.on_load("Save01_Bob_Riften");
        store.append_entry("Diary", "hello");

        let content = store.full_content("Diary", &fixture.mapping);
        assert!(content.contains("hello"));
    }

    #[test]
    fn append_with_no_session_still_buffers() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        store.append_entry("Diary", "early entry");

        assert_eq!(
            store.full_content("Diary", &fixture.mapping),
            "early entry\n"
        );
    }

    #[test]
    fn unmapped_key_returns_pending_only() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        store.on_load("Save01_Bob_Riften");
        store.append_entry("Not A Book", "floating text");

        assert_eq!(
            store.full_content("Not A Book", &fixture.mapping),
            "floating text\n"
        );
    }

    #[test]
    fn concrete_diary_scenario() {
        let fixture = Fixture::new();

        std::fs::write(
            fixture.diary_path(),
            "Intro\n;;SAVE_BLOCK ID=\"S1\" TIMELINE=\"T\" PARENT=\"\";;\nEntry one\n;;END_SAVE_DATA;;\n",
        )
        .unwrap();

        let mut store = fixture.store();
        store.on_load("S1");

        assert_eq!(
            store.full_content("Diary", &fixture.mapping),
            "Intro\nEntry one\n"
        );
    }

    #[test]
    fn save_then_reload_round_trips_without_duplication() {
        let fixture = Fixture::new();

        {
            let mut store = fixture.store();
            store.on_load("NewGame_Bob_Helgen");
            store.append_entry("Diary", "first line");
            store.append_entry("Diary", "second line");
            store.on_save("Save01_Bob_Riften.ess", &fixture.mapping);
        }

        // A fresh store instance, as after restarting the game.
        let mut store = fixture.store();
        store.on_load("Save01_Bob_Riften.ess");

        let content = store.full_content("Diary", &fixture.mapping);

        assert_eq!(content.matches("first line").count(), 1);
        assert_eq!(content.matches("second line").count(), 1);
        assert!(content.find("first line").unwrap() < content.find("second line").unwrap());
    }

    #[test]
    fn lineage_excludes_the_other_branch() {
        let fixture = Fixture::new();

        // One committed block per save: A, then divergent children B and C.
        {
            let mut store = fixture.store();
            store.on_load("A");
            store.append_entry("Diary", "from A");
            store.on_save("A", &fixture.mapping);

            store.append_entry("Diary", "from B");
            store.on_save("B", &fixture.mapping);
        }

        {
            // Branch: load A again and save to C.
            let mut store = fixture.store();
            store.on_load("A");
            store.append_entry("Diary", "from C");
            store.on_save("C", &fixture.mapping);
        }

        let mut store = fixture.store();

        store.on_load("B");
        let on_b = store.full_content("Diary", &fixture.mapping);
        assert!(on_b.contains("from A"));
        assert!(on_b.contains("from B"));
        assert!(!on_b.contains("from C"));

        store.on_load("C");
        let on_c = store.full_content("Diary", &fixture.mapping);
        assert!(on_c.contains("from A"));
        assert!(on_c.contains("from C"));
        assert!(!on_c.contains("from B"));
    }

    #[test]
    fn cyclic_history_terminates() {
        let fixture = Fixture::new();

        std::fs::write(
            fixture.dir.path().join("history.log"),
            "ID=\"A\" TIMELINE=\"T\" PARENT=\"B\"\nID=\"B\" TIMELINE=\"T\" PARENT=\"A\"\n",
        )
        .unwrap();

        std::fs::write(
            fixture.diary_path(),
            ";;SAVE_BLOCK ID=\"A\" TIMELINE=\"T\" PARENT=\"B\";;\nfrom A\n;;END_SAVE_DATA;;\n\
             ;;SAVE_BLOCK ID=\"B\" TIMELINE=\"T\" PARENT=\"A\";;\nfrom B\n;;END_SAVE_DATA;;\n",
        )
        .unwrap();

        let mut store = fixture.store();
        store.on_load("A");

        let content = store.full_content("Diary", &fixture.mapping);
        assert!(content.contains("from A"));
        assert!(content.contains("from B"));
    }

    #[test]
    fn malformed_block_header_hides_the_block() {
        let fixture = Fixture::new();

        // No closing quote on the ID; the tag swallows the neighbouring text and never matches
        // the real save id.
        std::fs::write(
            fixture.diary_path(),
            "Intro\n;;SAVE_BLOCK ID=\"S1 TIMELINE=\"\" PARENT=\"\";;\nlost text\n;;END_SAVE_DATA;;\n",
        )
        .unwrap();

        let mut store = fixture.store();
        store.on_load("S1");

        let content = store.full_content("Diary", &fixture.mapping);
        assert!(content.contains("Intro"));
        assert!(!content.contains("lost text"));
    }

    #[test]
    fn unterminated_block_drops_its_text() {
        let fixture = Fixture::new();

        std::fs::write(
            fixture.diary_path(),
            "Intro\n;;SAVE_BLOCK ID=\"S1\" TIMELINE=\"T\" PARENT=\"\";;\ndangling\n",
        )
        .unwrap();

        let mut store = fixture.store();
        store.on_load("S1");

        let content = store.full_content("Diary", &fixture.mapping);
        assert_eq!(content, "Intro\n");
    }

    #[test]
    fn history_log_records_every_save() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        store.on_load("Save01_Bob_Riften");

        // Nothing pending, but the save must still be recorded.
        store.on_save("Save02_Bob_Riften", &fixture.mapping);

        let history = std::fs::read_to_string(fixture.dir.path().join("history.log")).unwrap();
        assert!(history.contains("ID=\"Save02_Bob_Riften\""));
        assert!(history.contains("PARENT=\"Save01_Bob_Riften\""));
    }
}
