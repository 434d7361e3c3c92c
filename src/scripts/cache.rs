//! Compile-once cache: turns slot source text into a [`CompiledUnit`].
//!
//! A unit is built at most once per distinct source per slot. Building parses the text (parsed
//! ASTs are shared between slots through [`AstCache`]), runs the top-level statements once in a
//! fresh scope, then resolves the `update` entry point. Any failure yields a no-op unit that is
//! kept until the source changes, so a broken script is never rebuilt every frame.

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FnPtr, Map, Scope, AST, FLOAT};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Weak;

use crate::scene::{EntityId, EntityRecord};
use crate::scripts::bindings::Api;
use crate::scripts::SlotId;

pub const ENTRY_POINT: &str = "update";
const ENTRY_ARITY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

enum EntryPoint {
    /// `update` closure yielded by the top-level object map.
    Closure(FnPtr),
    /// Script-defined `fn update(target, api, dt)`.
    ScriptFn,
    Noop,
}

pub struct CompiledUnit {
    id: UnitId,
    ast: Option<AST>,
    scope: Scope<'static>,
    entry: EntryPoint,
    failure: Option<String>,
}

impl CompiledUnit {
    fn noop(id: UnitId, failure: Option<String>) -> Self {
        Self { id, ast: None, scope: Scope::new(), entry: EntryPoint::Noop, failure }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.entry, EntryPoint::Noop)
    }

    /// The construction error that produced this no-op unit, if any.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub(crate) fn call(&mut self, engine: &Engine, target: Dynamic, api: Api, dt: FLOAT) -> Result<(), Box<EvalAltResult>> {
        let Some(ast) = self.ast.as_ref() else {
            return Ok(());
        };
        match &self.entry {
            EntryPoint::Closure(fn_ptr) => fn_ptr.call::<Dynamic>(engine, ast, (target, api, dt)).map(|_| ()),
            EntryPoint::ScriptFn => {
                let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
                engine
                    .call_fn_with_options::<Dynamic>(options, &mut self.scope, ast, ENTRY_POINT, (target, api, dt))
                    .map(|_| ())
            }
            EntryPoint::Noop => Ok(()),
        }
    }
}

/// One scriptable attachment point: the scene singleton or one per loaded entity.
pub struct ScriptSlot {
    id: SlotId,
    source: String,
    digest: blake3::Hash,
    unit: Option<CompiledUnit>,
    compiled_digest: Option<blake3::Hash>,
    owner: Option<Weak<RefCell<EntityRecord>>>,
    pub(crate) compile_count: u64,
    pub(crate) update_calls: u64,
    pub(crate) runtime_errors: u64,
}

impl ScriptSlot {
    pub(crate) fn scene(source: impl Into<String>) -> Self {
        Self::new(SlotId::Scene, source.into(), None)
    }

    pub(crate) fn entity(id: EntityId, owner: Weak<RefCell<EntityRecord>>, source: impl Into<String>) -> Self {
        Self::new(SlotId::Entity(id), source.into(), Some(owner))
    }

    fn new(id: SlotId, source: String, owner: Option<Weak<RefCell<EntityRecord>>>) -> Self {
        let digest = blake3::hash(source.as_bytes());
        Self {
            id,
            source,
            digest,
            unit: None,
            compiled_digest: None,
            owner,
            compile_count: 0,
            update_calls: 0,
            runtime_errors: 0,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn owner(&self) -> Option<&Weak<RefCell<EntityRecord>>> {
        self.owner.as_ref()
    }

    pub fn unit(&self) -> Option<&CompiledUnit> {
        self.unit.as_ref()
    }

    pub(crate) fn unit_mut(&mut self) -> Option<&mut CompiledUnit> {
        self.unit.as_mut()
    }

    /// Stores new text; the cached unit goes stale when the text differs. Returns whether it changed.
    pub(crate) fn set_source(&mut self, source: impl Into<String>) -> bool {
        let source = source.into();
        let digest = blake3::hash(source.as_bytes());
        if digest == self.digest {
            return false;
        }
        self.source = source;
        self.digest = digest;
        true
    }

    pub(crate) fn invalidate(&mut self) {
        self.unit = None;
        self.compiled_digest = None;
    }

    /// Blank slots carry no script and are skipped by the driver.
    pub fn is_blank(&self) -> bool {
        self.source.trim().is_empty()
    }

    pub fn needs_compile(&self) -> bool {
        !self.is_blank() && (self.unit.is_none() || self.compiled_digest != Some(self.digest))
    }

    /// Whether the current unit came from a failed construction.
    pub fn failed(&self) -> bool {
        self.unit.as_ref().is_some_and(|unit| unit.failure.is_some())
    }
}

/// Parsed ASTs keyed by the blake3 digest of their source.
pub struct AstCache {
    entries: HashMap<blake3::Hash, AST>,
    order: VecDeque<blake3::Hash>,
    limit: usize,
    hits: u64,
    misses: u64,
}

impl AstCache {
    pub fn new(limit: usize) -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new(), limit: limit.max(1), hits: 0, misses: 0 }
    }

    pub fn get_or_compile(&mut self, engine: &Engine, digest: blake3::Hash, source: &str) -> Result<AST, String> {
        if let Some(ast) = self.entries.get(&digest) {
            self.hits += 1;
            return Ok(ast.clone());
        }
        self.misses += 1;
        let ast = engine.compile(source).map_err(|err| err.to_string())?;
        while self.entries.len() >= self.limit {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.entries.insert(digest, ast.clone());
        self.order.push_back(digest);
        Ok(ast)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// Builds a fresh unit for `slot`. On failure the slot receives a no-op unit and the message is returned.
pub(crate) fn rebuild(engine: &Engine, cache: &mut AstCache, slot: &mut ScriptSlot, id: UnitId) -> Result<(), String> {
    slot.compile_count += 1;
    slot.compiled_digest = Some(slot.digest);
    match construct(engine, cache, slot.digest, &slot.source, id) {
        Ok(unit) => {
            slot.unit = Some(unit);
            Ok(())
        }
        Err(message) => {
            slot.unit = Some(CompiledUnit::noop(id, Some(message.clone())));
            Err(message)
        }
    }
}

/// Marks the slot's current source as failed without rebuilding it, so the next dispatch skips it.
pub(crate) fn fail(slot: &mut ScriptSlot, id: UnitId, message: String) {
    slot.compiled_digest = Some(slot.digest);
    slot.unit = Some(CompiledUnit::noop(id, Some(message)));
}

fn construct(engine: &Engine, cache: &mut AstCache, digest: blake3::Hash, source: &str, id: UnitId) -> Result<CompiledUnit, String> {
    let ast = cache.get_or_compile(engine, digest, source)?;
    let mut scope = Scope::new();
    let yielded = engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast).map_err(|err| err.to_string())?;
    let entry = resolve_entry(&ast, yielded)?;
    Ok(CompiledUnit { id, ast: Some(ast), scope, entry, failure: None })
}

fn resolve_entry(ast: &AST, yielded: Dynamic) -> Result<EntryPoint, String> {
    let yielded = yielded.flatten();
    if yielded.is_map() {
        let map = yielded.cast::<Map>();
        if let Some(value) = map.get(ENTRY_POINT) {
            let value = value.flatten_clone();
            if !value.is::<FnPtr>() {
                return Err(format!("`{ENTRY_POINT}` must be a function, found {}", value.type_name()));
            }
            let fn_ptr = value.cast::<FnPtr>();
            check_closure_arity(ast, &fn_ptr)?;
            return Ok(EntryPoint::Closure(fn_ptr));
        }
    }
    let mut defined = ast.iter_functions().filter(|f| f.name == ENTRY_POINT).map(|f| f.params.len()).peekable();
    if defined.peek().is_none() {
        return Err(format!(
            "script defines no `{ENTRY_POINT}` entry point; define `fn {ENTRY_POINT}(target, api, dt)` or end with `#{{ {ENTRY_POINT}: |target, api, dt| ... }}`"
        ));
    }
    let arities: Vec<usize> = defined.collect();
    if arities.contains(&ENTRY_ARITY) {
        Ok(EntryPoint::ScriptFn)
    } else {
        Err(format!("`{ENTRY_POINT}` must take {ENTRY_ARITY} parameters (target, api, dt), found {}", arities[0]))
    }
}

fn check_closure_arity(ast: &AST, fn_ptr: &FnPtr) -> Result<(), String> {
    let curried = fn_ptr.curry().len();
    let declared = ast.iter_functions().find(|f| f.name == fn_ptr.fn_name()).map(|f| f.params.len());
    match declared {
        Some(total) if total.saturating_sub(curried) != ENTRY_ARITY => Err(format!(
            "`{ENTRY_POINT}` must take {ENTRY_ARITY} parameters (target, api, dt), found {}",
            total.saturating_sub(curried)
        )),
        _ => Ok(()),
    }
}
