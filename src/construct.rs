use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// the set of flags shared with registrants
use bitflags::bitflags;

// used to remember which elements have ever been written
use roaring::RoaringBitmap;

// interfaces are looked up by small integer ids
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::HashMap;

// used to print out readable forms of a construct
use std::fmt;

// our own stuff that we need
use crate::datatype::{BinaryInterface, ItemType, Scalar, Values};
use crate::error::{ConfregError, Result};
use crate::numeric::Bounds;
use crate::registry::Registry;
use crate::staging::StagingRecord;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;
pub type InterfaceMap = HashMap<u32, Arc<dyn BinaryInterface>, OtherHasher>;

/// Item names that only the internal section may use.
pub const RESERVED_NAMES: &[&str] = &[
    "all", "set", "reset", "lock", "unlock", "list", "limits", "status", "get",
];

// ------------- Flags -------------
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ItemFlags: u32 {
        const REQUIRE_DATA = 1;
        const REQUIRE_ALL_DATA = 2;
        const REJECT_AFTER_INIT = 4;
        const HARD_BOUND = 8;
        const STRICT_BOUND = 16;
        // maintained by the registry
        const INITIALIZED = 32;
        const ALL_INITIALIZED = 64;
        const NOT_INITIAL = 128;
        const DECLARABLE = Self::REQUIRE_DATA.bits()
            | Self::REQUIRE_ALL_DATA.bits()
            | Self::REJECT_AFTER_INIT.bits()
            | Self::HARD_BOUND.bits()
            | Self::STRICT_BOUND.bits();
    }
}

impl ItemFlags {
    pub fn strict(&self) -> bool {
        self.intersects(ItemFlags::HARD_BOUND | ItemFlags::STRICT_BOUND)
    }
}

// ------------- Abbreviations -------------
/// Shortest accepted abbreviation: everything before the first lowercase letter.
pub fn min_abbrev_len(name: &str) -> usize {
    name.char_indices()
        .find(|(_, c)| c.is_lowercase())
        .map(|(i, _)| i)
        .unwrap_or(name.len())
}

pub fn abbreviates(name: &str, min_len: usize, input: &str) -> bool {
    input.len() >= min_len.max(1)
        && input.len() <= name.len()
        && name
            .get(..input.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(input))
}

pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ------------- Callbacks -------------
/// What a callback is told about the assignment it may veto.
pub struct Invocation<'a> {
    pub registry: &'a Registry,
    pub item: &'a Item,
    /// Literal text for function items, the new string for text items.
    pub text: Option<&'a str>,
    pub changes: Option<&'a ChangeSet>,
    /// Section selected by the calling session, if any.
    pub default_section: Option<&'a str>,
}

/// Returning `Err` declines the change, which is then rolled back.
pub type Callback = Arc<dyn Fn(&Invocation<'_>) -> std::result::Result<(), String> + Send + Sync>;

pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Invocation<'_>) -> std::result::Result<(), String> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub index: usize,
    pub old: Scalar,
    pub new: Scalar,
}

/// The elements one assignment modified, with their values before and after.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub item: String,
    pub section: String,
    pub binary: bool,
    pub changes: Vec<Change>,
}

// ------------- Declarations -------------
/// An item as a registrant declares it, before type resolution.
#[derive(Clone)]
pub struct ItemDef {
    pub(crate) name: String,
    pub(crate) declared_type: String,
    pub(crate) size: i64,
    pub(crate) data: Option<Values>,
    pub(crate) initial: Option<String>,
    pub(crate) lower: Option<String>,
    pub(crate) upper: Option<String>,
    pub(crate) flags: ItemFlags,
    pub(crate) callback: Option<Callback>,
    pub(crate) mutex: Option<Arc<Mutex<()>>>,
}

impl ItemDef {
    pub fn new(name: &str, declared_type: &str, size: i64) -> Self {
        Self {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            size,
            data: None,
            initial: None,
            lower: None,
            upper: None,
            flags: ItemFlags::empty(),
            callback: None,
            mutex: None,
        }
    }
    pub fn function(name: &str, f: Callback) -> Self {
        Self::new(name, "Function", -1).callback(f)
    }
    pub fn initial(mut self, initial: &str) -> Self {
        self.initial = Some(initial.to_string());
        self
    }
    pub fn lower(mut self, lower: &str) -> Self {
        self.lower = Some(lower.to_string());
        self
    }
    pub fn upper(mut self, upper: &str) -> Self {
        self.upper = Some(upper.to_string());
        self
    }
    pub fn bounds(self, lower: &str, upper: &str) -> Self {
        self.lower(lower).upper(upper)
    }
    pub fn flags(mut self, flags: ItemFlags) -> Self {
        self.flags = flags;
        self
    }
    pub fn callback(mut self, f: Callback) -> Self {
        self.callback = Some(f);
        self
    }
    /// Brackets every transaction and callback of this item instead of its own mutex.
    pub fn with_mutex(mut self, mutex: Arc<Mutex<()>>) -> Self {
        self.mutex = Some(mutex);
        self
    }
    /// Storage supplied by the registrant instead of zeroed storage.
    pub fn with_data(mut self, data: Values) -> Self {
        self.data = Some(data);
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ItemDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ItemDef")
            .field("name", &self.name)
            .field("type", &self.declared_type)
            .field("size", &self.size)
            .field("initial", &self.initial)
            .field("flags", &self.flags)
            .finish()
    }
}

// ------------- Items -------------
pub(crate) struct ItemState {
    pub(crate) values: Values,
    pub(crate) staging: StagingRecord,
    pub(crate) flags: ItemFlags,
    pub(crate) touched: RoaringBitmap,
}

impl ItemState {
    pub(crate) fn stage(&mut self, low: usize, high: usize) {
        self.staging.stage(&self.values, low, high);
    }
    pub(crate) fn rollback(&mut self, interface: Option<&dyn BinaryInterface>) {
        self.staging.rollback(&mut self.values, interface);
    }
    fn change_set(&self, item: &Item, binary: bool) -> ChangeSet {
        let changes = self
            .staging
            .modified()
            .into_iter()
            .filter_map(|index| {
                let old = self.staging.saved().scalar(index)?;
                let new = self.values.scalar(index)?;
                Some(Change { index, old, new })
            })
            .collect();
        ChangeSet {
            item: item.name.clone(),
            section: item.section.clone(),
            binary,
            changes,
        }
    }
    /// Makes the staged elements permanent and updates the progress flags.
    pub(crate) fn commit(&mut self, full_range: bool) {
        let modified = self.staging.modified();
        if !modified.is_empty() {
            self.flags |= ItemFlags::INITIALIZED;
            self.touched.extend(modified.iter().map(|&i| i as u32));
        }
        let slots = self.values.slots() as u64;
        if full_range || (slots > 0 && self.touched.len() == slots) {
            self.flags |= ItemFlags::ALL_INITIALIZED;
        }
        self.staging.commit();
    }
}

/// A resolved item: typed storage, staging, bounds and the locks guarding them.
///
/// Lock order is the external mutex (or the item's transaction mutex), then
/// the state mutex. Callbacks run with the state mutex released.
pub struct Item {
    name: String,
    min_abbrev: usize,
    section: String,
    declared_type: String,
    item_type: ItemType,
    size: i64,
    element_size: usize,
    initial: Option<String>,
    lower: Option<String>,
    upper: Option<String>,
    bounds: Bounds,
    declared: ItemFlags,
    callback: Option<Callback>,
    interface: Option<Arc<dyn BinaryInterface>>,
    external: Option<Arc<Mutex<()>>>,
    internal: bool,
    locked: AtomicBool,
    transaction: Mutex<()>,
    pub(crate) state: Mutex<ItemState>,
}

impl Item {
    /// Validates a declaration and allocates its storage.
    pub(crate) fn resolve(
        def: ItemDef,
        section: &str,
        internal: bool,
        interfaces: &InterfaceMap,
    ) -> std::result::Result<Item, String> {
        let ItemDef {
            name,
            declared_type,
            size,
            data,
            initial,
            lower,
            upper,
            flags,
            callback,
            mutex,
        } = def;
        if !valid_name(&name) {
            return Err(format!("Invalid item name '{}'", name));
        }
        if !internal && RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
            return Err(format!("Item name '{}' is reserved", name));
        }
        let item_type = ItemType::resolve(&declared_type)
            .ok_or_else(|| format!("Invalid type '{}' of item '{}'", declared_type, name))?;
        let interface = match item_type {
            ItemType::External(id) => Some(
                interfaces
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| format!("No binary interface for type {} of item '{}'", id, name))?,
            ),
            _ => None,
        };
        let element_size = match &interface {
            Some(bi) => bi.element_size(),
            None => item_type.element_size().unwrap_or(0),
        };
        if item_type == ItemType::Function {
            if size != -1 {
                return Err(format!("Function item '{}' must have size -1", name));
            }
            if data.is_some() || lower.is_some() || upper.is_some() {
                return Err(format!("Function item '{}' takes no data or bounds", name));
            }
            if callback.is_none() {
                return Err(format!("Function item '{}' has no function", name));
            }
        } else {
            if size <= 0 {
                return Err(format!("Item '{}' has invalid size {}", name, size));
            }
            if element_size == 0 {
                return Err(format!("Item '{}' has zero element size", name));
            }
        }
        let bounds = match item_type.numeric_kind() {
            Some(kind) => Bounds::parse(kind, lower.as_deref(), upper.as_deref())
                .map_err(|e| format!("{} for item '{}'", e, name))?,
            None if lower.is_some() || upper.is_some() => {
                return Err(format!("Bounds of non-numeric item '{}'", name));
            }
            None => Bounds::default(),
        };
        let count = if item_type == ItemType::Function { 0 } else { size as usize };
        let values = match data {
            Some(values) if values.fits(item_type, count, element_size) => values,
            Some(_) => {
                return Err(format!("Data supplied for item '{}' does not match its type and size", name));
            }
            None => {
                let mut values = Values::zeroed(item_type, count, element_size);
                if let Some(bi) = &interface {
                    for idx in 0..count {
                        if let Some(element) = values.element_bytes_mut(idx) {
                            bi.init(element);
                        }
                    }
                }
                values
            }
        };
        let staging = StagingRecord::new(&values);
        Ok(Item {
            min_abbrev: min_abbrev_len(&name),
            name,
            section: section.to_string(),
            declared_type,
            item_type,
            size,
            element_size,
            initial,
            lower,
            upper,
            bounds,
            declared: flags & ItemFlags::DECLARABLE,
            callback,
            interface,
            external: mutex,
            internal,
            locked: AtomicBool::new(false),
            transaction: Mutex::new(()),
            state: Mutex::new(ItemState {
                values,
                staging,
                flags: flags & ItemFlags::DECLARABLE,
                touched: RoaringBitmap::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn section(&self) -> &str {
        &self.section
    }
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.section, self.name)
    }
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }
    pub fn item_type(&self) -> ItemType {
        self.item_type
    }
    pub fn size(&self) -> i64 {
        self.size
    }
    /// Addressable elements; text and function items have none.
    pub fn element_count(&self) -> usize {
        match self.item_type {
            ItemType::Function | ItemType::Text => 0,
            _ => self.size as usize,
        }
    }
    pub fn element_size(&self) -> usize {
        self.element_size
    }
    pub fn initial(&self) -> Option<&str> {
        self.initial.as_deref()
    }
    pub fn lower(&self) -> Option<&str> {
        self.lower.as_deref()
    }
    pub fn upper(&self) -> Option<&str> {
        self.upper.as_deref()
    }
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }
    pub fn declared_flags(&self) -> ItemFlags {
        self.declared
    }
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
    pub fn interface(&self) -> Option<&dyn BinaryInterface> {
        self.interface.as_deref()
    }
    pub fn is_internal(&self) -> bool {
        self.internal
    }
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
    pub(crate) fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }
    pub fn matches(&self, keyword: &str) -> bool {
        abbreviates(&self.name, self.min_abbrev, keyword)
    }
    pub fn flags(&self) -> Result<ItemFlags> {
        Ok(self.state.lock()?.flags)
    }
    /// A copy of the current values.
    pub fn values(&self) -> Result<Values> {
        Ok(self.state.lock()?.values.clone())
    }
    pub fn text(&self) -> Result<Option<String>> {
        Ok(self.state.lock()?.values.text().map(str::to_string))
    }

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, ItemState>> {
        Ok(self.state.lock()?)
    }
    pub(crate) fn reset_progress(&self, not_initial: bool) -> Result<()> {
        let mut state = self.state.lock()?;
        if not_initial {
            state.flags |= ItemFlags::NOT_INITIAL;
        } else {
            state.flags -= ItemFlags::INITIALIZED | ItemFlags::ALL_INITIALIZED | ItemFlags::NOT_INITIAL;
            state.touched.clear();
        }
        Ok(())
    }

    /// Serializes whole assignments to this item.
    pub(crate) fn begin(&self) -> Result<MutexGuard<'_, ()>> {
        match &self.external {
            Some(mutex) => Ok(mutex.lock()?),
            None => Ok(self.transaction.lock()?),
        }
    }

    /// Runs a function item's callback with the literal text.
    pub(crate) fn call(&self, registry: &Registry, text: &str, default_section: Option<&str>) -> Result<()> {
        let Some(cb) = &self.callback else {
            return Err(ConfregError::Rejected(self.name.clone()));
        };
        cb(&Invocation {
            registry,
            item: self,
            text: Some(text),
            changes: None,
            default_section,
        })
        .map_err(|reason| ConfregError::Declined {
            item: self.name.clone(),
            reason,
        })?;
        self.state.lock()?.flags |= ItemFlags::INITIALIZED;
        Ok(())
    }

    /// Lets the callback vet the staged elements, then commits or rolls back.
    pub(crate) fn settle<'g>(
        &'g self,
        registry: &Registry,
        mut state: MutexGuard<'g, ItemState>,
        full_range: bool,
        binary: bool,
        default_section: Option<&str>,
    ) -> Result<()> {
        if let Some(cb) = &self.callback {
            let changes = state.change_set(self, binary);
            let text = state.values.text().map(str::to_string);
            drop(state);
            let verdict = cb(&Invocation {
                registry,
                item: self,
                text: text.as_deref(),
                changes: Some(&changes),
                default_section,
            });
            state = self.state.lock()?;
            if let Err(reason) = verdict {
                state.rollback(self.interface.as_deref());
                return Err(ConfregError::Declined {
                    item: self.name.clone(),
                    reason,
                });
            }
        }
        state.commit(full_range);
        Ok(())
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Item")
            .field("section", &self.section)
            .field("name", &self.name)
            .field("type", &self.item_type)
            .field("size", &self.size)
            .field("locked", &self.is_locked())
            .finish()
    }
}

// ------------- Blocks -------------
/// Outcome of validating and initializing one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Ok,
    /// An item failed validation.
    BadDefinition,
    /// An initial value could not be applied.
    BadInitial,
    /// Required data was not provided.
    MissingData,
}

#[derive(Debug)]
pub struct Block {
    pub(crate) name: String,
    pub(crate) items: Vec<Item>,
    pub(crate) status: BlockStatus,
    pub(crate) internal: bool,
}

impl Block {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn items(&self) -> &[Item] {
        &self.items
    }
    pub fn status(&self) -> BlockStatus {
        self.status
    }
    pub fn is_internal(&self) -> bool {
        self.internal
    }
    pub(crate) fn degrade(&mut self, status: BlockStatus) {
        if self.status == BlockStatus::Ok {
            self.status = status;
        }
    }
}
