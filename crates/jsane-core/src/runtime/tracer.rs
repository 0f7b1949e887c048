//! Data-flow tracer.
//!
//! Every traced assignment records where its value came from as a
//! [`TraceItem`] keyed by the assigned location. Locations private to a
//! function call live in that call's [`Frame`] and vanish when it returns;
//! locations reachable from outside (object properties, globals, variables
//! captured by closures) live in the global table for the life of the
//! runtime. When a value flows from a frame into the global table, the
//! local history it was derived from is promoted along with it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::classify::should_trace;
use super::errors::TracerError;
use super::identity::{TraceIds, GLOBAL_OBJECT_TRACE_ID};
use super::value::Value;

/// Longest chain [`Tracer::trace_lines`] follows.
pub const MAX_TRACE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    /// The innermost call frame.
    Local,
    /// An object identity, the global object or a call frame.
    Id(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Name(String),
    /// Outgoing argument of the call being prepared.
    Argument(u32),
    /// Return value of a call.
    Return,
    /// A value with no location, such as a literal.
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceKey {
    pub scope: ScopeId,
    pub slot: Slot,
}

impl TraceKey {
    pub fn new(scope: ScopeId, slot: Slot) -> Self {
        Self { scope, slot }
    }

    pub fn local(slot: Slot) -> Self {
        Self::new(ScopeId::Local, slot)
    }

    pub fn global(name: &str) -> Self {
        Self::new(ScopeId::Id(GLOBAL_OBJECT_TRACE_ID), Slot::Name(name.to_string()))
    }

    /// Key of a value whose origin is not tracked.
    pub fn untraced() -> Self {
        Self::local(Slot::Anonymous)
    }

    pub fn is_local(&self) -> bool {
        self.scope == ScopeId::Local
    }

    pub fn is_traced(&self) -> bool {
        self.slot != Slot::Anonymous
    }
}

impl fmt::Display for TraceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.scope, &self.slot) {
            (_, Slot::Anonymous) => write!(f, "literal"),
            (ScopeId::Local, Slot::Name(name)) => write!(f, "local '{name}'"),
            (ScopeId::Local, Slot::Argument(index)) => write!(f, "argument #{index}"),
            (ScopeId::Local, Slot::Return) => write!(f, "return value"),
            (ScopeId::Id(GLOBAL_OBJECT_TRACE_ID), Slot::Name(name)) => write!(f, "global '{name}'"),
            (ScopeId::Id(id), Slot::Name(name)) => write!(f, "#{id}.'{name}'"),
            (ScopeId::Id(id), Slot::Argument(index)) => write!(f, "argument #{index} of call #{id}"),
            (ScopeId::Id(id), Slot::Return) => write!(f, "return value of call #{id}"),
        }
    }
}

/// A recorded value and the key it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceItem {
    pub value: Value,
    pub source: TraceKey,
}

impl TraceItem {
    pub fn new(value: Value, source: TraceKey) -> Self {
        Self { value, source }
    }
}

/// Trace state of one active call.
#[derive(Debug)]
pub struct Frame {
    pub call_id: u64,
    entries: HashMap<Slot, TraceItem>,
    /// Return value of the most recent call made from this frame.
    callee_return: Option<TraceItem>,
    /// Argument count of a script call about to be entered.
    pending_argc: Option<usize>,
}

impl Frame {
    fn new(call_id: u64) -> Self {
        Self {
            call_id,
            entries: HashMap::new(),
            callee_return: None,
            pending_argc: None,
        }
    }
}

pub struct Tracer {
    global: DashMap<TraceKey, TraceItem>,
    stack: Mutex<Vec<Frame>>,
    ids: Arc<TraceIds>,
}

impl Tracer {
    /// Create a tracer with its bottom frame in place.
    pub fn new(ids: Arc<TraceIds>) -> Self {
        let bottom = Frame::new(ids.allocate());
        Self {
            global: DashMap::new(),
            stack: Mutex::new(vec![bottom]),
            ids,
        }
    }

    /// Number of frames, the bottom frame included.
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    pub fn global_entry(&self, key: &TraceKey) -> Option<TraceItem> {
        self.global.get(key).map(|entry| entry.value().clone())
    }

    /// Entry of the innermost frame.
    pub fn local_entry(&self, slot: &Slot) -> Option<TraceItem> {
        self.stack.lock().last().and_then(|frame| frame.entries.get(slot).cloned())
    }

    /// Enter a call whose parameters are `names`. Unnamed parameters are
    /// not tracked. Parameters listed in `captured` are read by closures
    /// through the global table, so their history is promoted there under
    /// the new call's id. Returns the call's trace id.
    pub fn push_frame(&self, names: &[Option<String>], captured: &[String]) -> Result<u64, TracerError> {
        let call_id = self.ids.allocate();
        let mut frame = Frame::new(call_id);
        let mut stack = self.stack.lock();

        // Without a pending argument count the caller is not instrumented
        // and has recorded nothing to connect.
        let pending = stack.last_mut().and_then(|caller| caller.pending_argc.take());
        if let Some(argc) = pending {
            let caller = stack.len() - 1;
            for (index, name) in names.iter().enumerate() {
                let Some(name) = name else { continue };
                let slot = Slot::Argument(index as u32);
                let item = if index >= argc {
                    TraceItem::new(Value::Undefined, TraceKey::untraced())
                } else {
                    match stack[caller].entries.get(&slot) {
                        Some(passed) if should_trace(&passed.value) => {
                            TraceItem::new(passed.value.clone(), TraceKey::local(slot.clone()))
                        }
                        _ => continue,
                    }
                };
                if captured.contains(name) {
                    let source = if item.source.is_traced() {
                        // The new frame is not pushed yet; `caller + 1` is
                        // where it will be.
                        self.promote(&stack, caller + 1, &slot)?
                    } else {
                        item.source.clone()
                    };
                    self.global.insert(
                        TraceKey::new(ScopeId::Id(call_id), Slot::Name(name.clone())),
                        TraceItem::new(item.value.clone(), source),
                    );
                }
                frame.entries.insert(Slot::Name(name.clone()), item);
            }
        }

        stack.push(frame);
        tracing::debug!(call_id, depth = stack.len(), "trace frame pushed");
        Ok(call_id)
    }

    /// Leave the innermost call, handing its return value's history to the
    /// caller. Popping the bottom frame is a stack underflow.
    pub fn pop_frame(&self) -> Result<(), TracerError> {
        let mut stack = self.stack.lock();
        if stack.len() <= 1 {
            return Err(TracerError::StackUnderflow);
        }
        let top = stack.len() - 1;
        let call_id = stack[top].call_id;

        if let Some(returned) = stack[top].entries.get(&Slot::Return).cloned() {
            let source = if returned.source.is_local() && returned.source.is_traced() {
                self.promote(&stack, top, &returned.source.slot)?
            } else {
                returned.source
            };
            let key = TraceKey::new(ScopeId::Id(call_id), Slot::Return);
            self.global.insert(key.clone(), TraceItem::new(returned.value.clone(), source));
            stack[top - 1].callee_return = Some(TraceItem::new(returned.value, key));
        } else {
            stack[top - 1].callee_return = None;
        }

        stack.pop();
        tracing::debug!(call_id, depth = stack.len(), "trace frame popped");
        Ok(())
    }

    /// Record that `value`, read from `source`, was stored at `target`.
    pub fn record(&self, target: TraceKey, value: Value, source: TraceKey) -> Result<(), TracerError> {
        if !target.is_traced() {
            return Ok(());
        }
        let is_argument = target.is_local() && matches!(target.slot, Slot::Argument(_));
        let mut stack = self.stack.lock();

        if !should_trace(&value) && !is_argument {
            // A clean value supersedes whatever the frame held for the slot.
            if target.is_local() {
                if let Some(frame) = stack.last_mut() {
                    frame.entries.remove(&target.slot);
                }
            }
            return Ok(());
        }

        let top = stack.len() - 1;
        let source = if source.is_local() && source.slot == Slot::Return {
            match &stack[top].callee_return {
                Some(returned) => returned.source.clone(),
                None => TraceKey::untraced(),
            }
        } else {
            source
        };

        tracing::debug!(%target, %source, "trace record");
        match target.scope {
            ScopeId::Local => {
                stack[top].entries.insert(target.slot, TraceItem::new(value, source));
            }
            ScopeId::Id(_) => {
                let source = if source.is_local() && source.is_traced() {
                    self.promote(&stack, top, &source.slot)?
                } else {
                    source
                };
                self.global.insert(target, TraceItem::new(value, source));
            }
        }
        Ok(())
    }

    /// Forget the previous callee's return value.
    pub fn clear_return(&self) {
        if let Some(frame) = self.stack.lock().last_mut() {
            frame.callee_return = None;
        }
    }

    /// Announce a script call with `argc` arguments to the next
    /// [`Self::push_frame`].
    pub fn stamp_pending(&self, argc: usize) {
        if let Some(frame) = self.stack.lock().last_mut() {
            frame.pending_argc = Some(argc);
        }
    }

    pub fn clear_pending(&self) {
        if let Some(frame) = self.stack.lock().last_mut() {
            frame.pending_argc = None;
        }
    }

    /// Where a local `slot`, as referenced from frame `cursor`, is stored.
    /// Argument slots referenced by a callee live in its caller's frame.
    fn locate(cursor: usize, slot: &Slot, referenced_from_callee: bool) -> Result<usize, TracerError> {
        match slot {
            Slot::Argument(index) if referenced_from_callee => cursor.checked_sub(1).ok_or_else(|| {
                TracerError::Desynchronized(format!("argument #{index} referenced from the bottom frame"))
            }),
            _ => Ok(cursor),
        }
    }

    /// Copy the local history behind `slot` (as referenced from frame
    /// `cursor`) into the global table and return the key it now has there.
    fn promote(&self, stack: &[Frame], cursor: usize, slot: &Slot) -> Result<TraceKey, TracerError> {
        let mut hops: Vec<(u64, Slot, Value)> = Vec::new();
        let mut seen: HashSet<(usize, Slot)> = HashSet::new();
        let mut cursor = Self::locate(cursor, slot, true)?;
        let mut slot = slot.clone();

        let terminal = loop {
            let frame = &stack[cursor];
            if !seen.insert((cursor, slot.clone())) {
                break TraceKey::new(ScopeId::Id(frame.call_id), slot);
            }
            // A local with no entry got its value before tracing saw it.
            let Some(item) = frame.entries.get(&slot) else {
                break TraceKey::new(ScopeId::Id(frame.call_id), slot);
            };
            hops.push((frame.call_id, slot.clone(), item.value.clone()));
            if !item.source.is_local() || !item.source.is_traced() {
                break item.source.clone();
            }
            cursor = Self::locate(cursor, &item.source.slot, true)?;
            slot = item.source.slot.clone();
        };

        let mut source = terminal;
        for (call_id, slot, value) in hops.into_iter().rev() {
            let key = TraceKey::new(ScopeId::Id(call_id), slot);
            self.global.insert(key.clone(), TraceItem::new(value, source));
            source = key;
        }
        Ok(source)
    }

    /// Human-readable provenance of the value at `key`, newest first. Each
    /// line reads `<location> = <value> <- <source>`.
    pub fn trace_lines(&self, key: &TraceKey) -> Vec<String> {
        let stack = self.stack.lock();
        let mut lines = Vec::new();
        let mut seen: HashSet<(Option<usize>, TraceKey)> = HashSet::new();
        let mut current = key.clone();
        let mut cursor = stack.len() - 1;
        // The first key is what the checked code itself read.
        let mut from_callee = false;

        for _ in 0..MAX_TRACE_DEPTH {
            if !current.is_traced() {
                break;
            }
            let (item, frame) = match current.scope {
                ScopeId::Id(_) => (self.global.get(&current).map(|entry| entry.value().clone()), None),
                ScopeId::Local if current.slot == Slot::Return => (stack[cursor].callee_return.clone(), Some(cursor)),
                ScopeId::Local => {
                    let Ok(located) = Self::locate(cursor, &current.slot, from_callee) else {
                        break;
                    };
                    cursor = located;
                    (stack[cursor].entries.get(&current.slot).cloned(), Some(cursor))
                }
            };
            if !seen.insert((frame, current.clone())) {
                break;
            }
            let Some(item) = item else { break };
            lines.push(format!("{current} = {} <- {}", item.value.describe(), item.source));
            current = item.source;
            from_callee = true;
        }
        lines
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("global_entries", &self.global.len())
            .field("depth", &self.depth())
            .finish()
    }
}
