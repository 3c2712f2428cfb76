use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// used to keep the one-to-one mapping between section names and block positions
use bimap::BiMap;

use tracing::{info, warn};

// our own stuff that we need
use crate::assign;
use crate::commands::{self, ListFormat};
use crate::construct::{Block, BlockStatus, InterfaceMap, Item, ItemDef, ItemFlags};
use crate::datatype::{BinaryInterface, Values};
use crate::error::{ConfregError, Result};
use crate::history::{History, HistoryEntry};
use crate::interface::{LineSource, OutputSink, Session, StdoutSink};

/// Name of the section holding the built-in commands.
pub const INTERNAL_SECTION: &str = "_internal_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sections may still be registered.
    Registering,
    /// Initial values and the first line source are being applied.
    Initializing,
    /// Accepting assignments.
    Ready,
    /// A schema error voided the registry.
    Failed,
}

struct Pending {
    section: Option<String>,
    items: Vec<ItemDef>,
    internal: bool,
}

/// Sections and items. Registration and finalize take `&mut self`; afterwards
/// a registry can be shared between threads, each applying through a [`Session`].
pub struct Registry {
    pending: Vec<Pending>,
    blocks: Vec<Block>,
    sections: BiMap<String, usize>,
    interfaces: InterfaceMap,
    phase: Phase,
    internal_hidden: AtomicBool,
    output: Mutex<Box<dyn OutputSink>>,
    list_format: Mutex<ListFormat>,
    history: Mutex<Option<History>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry holding only the `_internal_` command section.
    pub fn new() -> Self {
        // all built-in commands share one mutex
        let internal_mutex = Arc::new(Mutex::new(()));
        let items = commands::internal_items()
            .into_iter()
            .map(|def| def.with_mutex(Arc::clone(&internal_mutex)))
            .collect();
        Self {
            pending: vec![Pending {
                section: Some(INTERNAL_SECTION.to_string()),
                items,
                internal: true,
            }],
            blocks: Vec::new(),
            sections: BiMap::new(),
            interfaces: InterfaceMap::default(),
            phase: Phase::Registering,
            internal_hidden: AtomicBool::new(false),
            output: Mutex::new(Box::new(StdoutSink)),
            list_format: Mutex::new(ListFormat::default()),
            history: Mutex::new(None),
        }
    }

    // ------------- Setup -------------
    /// Adds a section of items. Unnamed sections can only be reached by
    /// unqualified item names.
    pub fn register(&mut self, items: Vec<ItemDef>, section: Option<&str>) -> Result<()> {
        if self.phase != Phase::Registering {
            warn!("Registration attempted after the configuration was finalized");
            return Err(ConfregError::RegistrationClosed);
        }
        if items.is_empty() {
            return Ok(());
        }
        if let Some(name) = section {
            if name.eq_ignore_ascii_case("all") || name.eq_ignore_ascii_case(INTERNAL_SECTION) {
                warn!(section = name, "Reserved name is invalid as configuration section");
                return Err(ConfregError::InvalidSection(name.to_string()));
            }
            if name.is_empty() || name.contains([':', '[', ']']) {
                warn!(section = name, "Invalid configuration section name");
                return Err(ConfregError::InvalidSection(name.to_string()));
            }
            if self.pending.iter().any(|p| p.section.as_deref() == Some(name)) {
                warn!(section = name, "Configuration section registered twice");
                return Err(ConfregError::InvalidSection(name.to_string()));
            }
        }
        self.pending.push(Pending {
            section: section.map(str::to_string),
            items,
            internal: false,
        });
        Ok(())
    }

    /// Makes an externally defined element type available to items declaring its id.
    pub fn register_binary_interface(&mut self, interface: Arc<dyn BinaryInterface>) -> Result<()> {
        if self.phase != Phase::Registering {
            return Err(ConfregError::RegistrationClosed);
        }
        let id = interface.type_id();
        if id == 0 || interface.element_size() == 0 {
            return Err(ConfregError::Binary(format!(
                "Binary interface '{}' needs a positive type id and element size",
                interface.name()
            )));
        }
        if self.interfaces.insert(id, interface).is_some() {
            warn!(type_id = id, "Binary interface replaced");
        }
        Ok(())
    }

    /// Resolves all items, applies their initial values, then pulls the
    /// optional line source. Can only be called once.
    ///
    /// A schema error voids the whole registry. Missing required data or
    /// failing configuration lines leave the registry usable but are
    /// reported as [`ConfregError::Incomplete`].
    pub fn finalize(&mut self, source: Option<&mut dyn LineSource>) -> Result<()> {
        if self.phase != Phase::Registering {
            warn!("Invalid attempt to re-initialize configuration data");
            return Err(ConfregError::AlreadyFinalized);
        }
        let mut errors = Vec::new();
        for pending in std::mem::take(&mut self.pending) {
            let name = pending.section.unwrap_or_default();
            let mut block = Block {
                name,
                items: Vec::with_capacity(pending.items.len()),
                status: BlockStatus::Ok,
                internal: pending.internal,
            };
            for def in pending.items {
                match Item::resolve(def, &block.name, block.internal, &self.interfaces) {
                    Ok(item) => block.items.push(item),
                    Err(message) => {
                        warn!(section = %block.name, "{}", message);
                        errors.push(message);
                        block.status = BlockStatus::BadDefinition;
                    }
                }
            }
            if !block.name.is_empty() {
                self.sections.insert(block.name.clone(), self.blocks.len());
            }
            self.blocks.push(block);
        }
        if !errors.is_empty() {
            self.phase = Phase::Failed;
            warn!("Configuration data ignored due to syntax or other error(s)");
            return Err(ConfregError::Schema(errors));
        }

        self.phase = Phase::Initializing;
        let mut problems = Vec::new();
        let mut bad_initial = Vec::new();
        for (b, block) in self.blocks.iter().enumerate() {
            for item in &block.items {
                item.reset_progress(false)?;
                if let Some(initial) = item.initial() {
                    if let Err(e) = assign::assign(self, item, initial, None) {
                        let message = format!(
                            "Invalid internal configuration data for item '{}' of section [{}]: {}",
                            item.name(),
                            block.name,
                            e
                        );
                        warn!("{}", message);
                        problems.push(message);
                        bad_initial.push(b);
                    }
                }
            }
        }
        for b in bad_initial {
            self.blocks[b].degrade(BlockStatus::BadInitial);
        }

        if let Some(source) = source {
            problems.extend(self.pull(source));
        }
        self.phase = Phase::Ready;

        let mut missing = Vec::new();
        for (b, block) in self.blocks.iter().enumerate() {
            for item in &block.items {
                item.reset_progress(true)?;
                let flags = item.flags()?;
                let message = if flags.contains(ItemFlags::REQUIRE_DATA)
                    && !flags.contains(ItemFlags::INITIALIZED)
                {
                    "No configuration data"
                } else if flags.contains(ItemFlags::REQUIRE_ALL_DATA)
                    && !flags.contains(ItemFlags::ALL_INITIALIZED)
                {
                    "No complete configuration data"
                } else {
                    continue;
                };
                let message = format!("{} for item '{}' of section [{}]", message, item.name(), block.name);
                warn!("{}", message);
                problems.push(message);
                missing.push(b);
            }
        }
        for b in missing {
            self.blocks[b].degrade(BlockStatus::MissingData);
        }
        for block in self.blocks.iter().filter(|b| b.status != BlockStatus::Ok) {
            warn!(section = %block.name, "Bad items in configuration section");
        }
        if !problems.is_empty() {
            warn!("Error in configuration data or incomplete configuration");
            return Err(ConfregError::Incomplete(problems));
        }
        info!(sections = self.blocks.len(), "Configuration finalized");
        Ok(())
    }

    /// Applies another line source after finalization.
    pub fn reload(&self, source: &mut dyn LineSource) -> Result<()> {
        if self.phase != Phase::Ready {
            return Err(ConfregError::Unusable);
        }
        let problems = self.pull(source);
        if problems.is_empty() {
            Ok(())
        } else {
            warn!("Error in configuration data");
            Err(ConfregError::Incomplete(problems))
        }
    }

    fn pull(&self, source: &mut dyn LineSource) -> Vec<String> {
        self.session()
            .pull(source)
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    // ------------- State -------------
    pub fn phase(&self) -> Phase {
        self.phase
    }
    /// 0 while initializing, 1 once external input is being accepted.
    pub fn level(&self) -> u8 {
        match self.phase {
            Phase::Ready => 1,
            _ => 0,
        }
    }
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        match self.phase {
            Phase::Initializing | Phase::Ready => Ok(()),
            _ => Err(ConfregError::Unusable),
        }
    }

    pub fn unhook_internal(&self) {
        self.internal_hidden.store(true, Ordering::SeqCst);
    }
    pub fn rehook_internal(&self) {
        self.internal_hidden.store(false, Ordering::SeqCst);
    }
    pub fn internal_hooked(&self) -> bool {
        !self.internal_hidden.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Session<'_> {
        Session::new(self)
    }

    /// One-shot assignment without a default section. A section directive is
    /// accepted but forgotten when the call returns; use a [`Session`] to keep it.
    pub fn apply_text(&self, text: &str) -> Result<()> {
        let mut session = self.session();
        session.apply_text(text)?;
        Self::forget_section(&session);
        Ok(())
    }
    pub fn apply_binary(&self, buffer: &[u8]) -> Result<()> {
        let mut session = self.session();
        session.apply_binary(buffer)?;
        Self::forget_section(&session);
        Ok(())
    }
    fn forget_section(session: &Session<'_>) {
        if let Some(section) = session.default_section() {
            warn!(section, "Section directive has no effect outside a session");
        }
    }

    // ------------- Lookup -------------
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
    fn visible_blocks(&self) -> impl Iterator<Item = &Block> {
        let hooked = self.internal_hooked();
        self.blocks.iter().filter(move |b| hooked || !b.internal)
    }
    /// Items reachable by lookup, in registration order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.visible_blocks().flat_map(|b| b.items.iter())
    }
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_left(name)
    }
    pub fn section(&self, name: &str) -> Option<&Block> {
        self.sections.get_by_left(name).and_then(|&b| self.blocks.get(b))
    }
    pub fn verify_section(&self, name: &str) -> Option<BlockStatus> {
        self.section(name).map(|b| b.status)
    }

    /// Finds an item by (abbreviated) name, optionally qualified as `section:name`.
    /// The first match in registration order wins.
    pub fn lookup(&self, name: &str) -> Option<&Item> {
        match name.split_once(':') {
            Some((section, name)) => self
                .section(section)
                .filter(|b| !b.internal || self.internal_hooked())
                .and_then(|b| b.items.iter().find(|i| i.matches(name))),
            None => self.items().find(|i| i.matches(name)),
        }
    }
    pub fn find(&self, name: &str) -> Result<&Item> {
        self.lookup(name)
            .ok_or_else(|| ConfregError::UnknownItem(name.to_string()))
    }
    pub fn values(&self, name: &str) -> Result<Values> {
        self.find(name)?.values()
    }
    pub fn text(&self, name: &str) -> Result<Option<String>> {
        self.find(name)?.text()
    }
    pub fn flags(&self, name: &str) -> Result<ItemFlags> {
        self.find(name)?.flags()
    }
    pub fn is_locked(&self, name: &str) -> Result<bool> {
        Ok(self.find(name)?.is_locked())
    }

    // ------------- Locking -------------
    /// Locks or unlocks one item; internal items refuse both.
    pub fn set_locked(&self, name: &str, locked: bool) -> Result<()> {
        let item = self.find(name)?;
        if item.is_internal() {
            return Err(ConfregError::Rejected(item.qualified_name()));
        }
        item.set_locked(locked);
        Ok(())
    }
    pub fn lock(&self, name: &str) -> Result<()> {
        self.set_locked(name, true)
    }
    pub fn unlock(&self, name: &str) -> Result<()> {
        self.set_locked(name, false)
    }

    // ------------- Output & history -------------
    pub fn set_output(&self, sink: Box<dyn OutputSink>) -> Result<()> {
        *self.output.lock()? = sink;
        Ok(())
    }
    pub(crate) fn emit(&self, text: &str) -> Result<()> {
        self.output.lock()?.write_text(text);
        Ok(())
    }
    /// Style and prefix of the statements printed by `LIST`.
    pub fn set_list_format(&self, format: ListFormat) -> Result<()> {
        *self.list_format.lock()? = format;
        Ok(())
    }
    pub(crate) fn list_format(&self) -> Result<ListFormat> {
        Ok(self.list_format.lock()?.clone())
    }

    /// Starts recording successful lookups and section directives.
    pub fn enable_history(&self) -> Result<()> {
        let mut history = self.history.lock()?;
        if history.is_none() {
            *history = Some(History::new());
        }
        Ok(())
    }
    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .history
            .lock()?
            .as_ref()
            .map(|h| h.entries().to_vec())
            .unwrap_or_default())
    }
    pub(crate) fn record(&self, text: &str) -> Result<()> {
        if let Some(history) = self.history.lock()?.as_mut() {
            history.push(text, self.level());
        }
        Ok(())
    }
}
