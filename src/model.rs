//! Breakpoint model (C3): scripts, parsed functions, and the breakpoints
//! attached to them. Functions live in an arena keyed by their compressed
//! pointer; breakpoints reference their owning function by that key
//! rather than by a Rust reference, so there is no `Rc`/`RefCell` cycle
//! between [`Breakpoint`] and [`ParsedFunction`] (spec.md Design Notes §9).

use std::collections::BTreeMap;
use std::collections::HashMap;

/// A compressed pointer, normalized to a host-native `u32` regardless of
/// whether the wire representation was 2 or 4 bytes.
pub type Cp = u32;

/// 1-indexed script id; index 0 is a reserved sentinel and is never a
/// valid script.
pub type ScriptId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelError {
    /// `script_id` was 0 or past the end of the script table.
    NoSuchScript(ScriptId),
    /// The line has no statement-boundary breakpoint in any function.
    NoBreakpointAtLine(ScriptId, u32),
}

#[derive(Debug, Clone)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    pub source: String,
}

impl Script {
    pub fn line_count(&self) -> usize {
        self.source.split('\n').count()
    }
}

/// A single breakpoint: a statement boundary inside a [`ParsedFunction`],
/// addressable both by source line and by bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub script_id: ScriptId,
    pub func: Cp,
    pub line: u32,
    pub offset: u32,
    /// `-1` means inactive; otherwise the position of this breakpoint in
    /// the client's sparse active-breakpoint set.
    pub active_index: i32,
}

impl Breakpoint {
    pub fn is_active(&self) -> bool {
        self.active_index >= 0
    }
}

/// Opaque handle identifying one breakpoint within the model. Stable for
/// the lifetime of the owning function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointHandle {
    pub func: Cp,
    index: usize,
}

/// A function (or the synthesized top-level frame) as delivered by
/// PARSE_FUNCTION/BYTE_CODE_CP.
#[derive(Debug, Clone)]
pub struct ParsedFunction {
    pub byte_code_cp: Cp,
    pub script_id: ScriptId,
    pub is_func: bool,
    pub line: u32,
    pub column: u32,
    pub name: String,
    pub source_name: String,
    breakpoints: Vec<Breakpoint>,
    lines: BTreeMap<u32, usize>,
    offsets: BTreeMap<u32, usize>,
    pub first_breakpoint_line: Option<u32>,
    pub first_breakpoint_offset: Option<u32>,
}

impl ParsedFunction {
    pub fn new(
        byte_code_cp: Cp,
        script_id: ScriptId,
        is_func: bool,
        line: u32,
        column: u32,
        name: String,
        source_name: String,
        line_list: &[u32],
        offset_list: &[u32],
    ) -> Self {
        let mut breakpoints = Vec::with_capacity(line_list.len());
        let mut lines = BTreeMap::new();
        let mut offsets = BTreeMap::new();
        for (i, (&line_no, &offset)) in line_list.iter().zip(offset_list.iter()).enumerate() {
            breakpoints.push(Breakpoint {
                script_id,
                func: byte_code_cp,
                line: line_no,
                offset,
                active_index: -1,
            });
            lines.insert(line_no, i);
            offsets.insert(offset, i);
        }
        let first_breakpoint_line = line_list.first().copied();
        let first_breakpoint_offset = offset_list.first().copied();

        ParsedFunction {
            byte_code_cp,
            script_id,
            is_func,
            line,
            column,
            name,
            source_name,
            breakpoints,
            lines,
            offsets,
            first_breakpoint_line,
            first_breakpoint_offset,
        }
    }

    /// The displayed name: the engine reports an empty name for anonymous
    /// functions, which renders as `"function"`.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "function"
        } else {
            &self.name
        }
    }

    pub fn breakpoint_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.lines.keys().copied()
    }

    fn handle_for_line(&self, line: u32) -> Option<BreakpointHandle> {
        self.lines.get(&line).map(|&index| BreakpointHandle {
            func: self.byte_code_cp,
            index,
        })
    }

    fn breakpoint(&self, handle: BreakpointHandle) -> &Breakpoint {
        &self.breakpoints[handle.index]
    }

    fn breakpoint_mut(&mut self, handle: BreakpointHandle) -> &mut Breakpoint {
        &mut self.breakpoints[handle.index]
    }

    /// Resolve `offset` to a breakpoint per spec.md §4.3: exact match,
    /// then the lowest-offset breakpoint if `offset` precedes it, else
    /// the largest stored offset `<= offset` (inexact).
    fn resolve_offset(&self, offset: u32) -> Option<(BreakpointHandle, bool)> {
        if let Some(&index) = self.offsets.get(&offset) {
            return Some((
                BreakpointHandle {
                    func: self.byte_code_cp,
                    index,
                },
                true,
            ));
        }
        let first_offset = self.first_breakpoint_offset?;
        if offset < first_offset {
            let index = self.offsets[&first_offset];
            return Some((
                BreakpointHandle {
                    func: self.byte_code_cp,
                    index,
                },
                true,
            ));
        }
        self.offsets
            .range(..=offset)
            .next_back()
            .map(|(_, &index)| {
                (
                    BreakpointHandle {
                        func: self.byte_code_cp,
                        index,
                    },
                    false,
                )
            })
    }
}

/// The client-side model of scripts, functions, and breakpoints (C3).
#[derive(Default)]
pub struct BreakpointModel {
    scripts: Vec<Script>,
    next_script_id: ScriptId,
    functions: HashMap<Cp, ParsedFunction>,
    new_functions: HashMap<Cp, ParsedFunction>,
    /// Staging order, in the order `stage_function` was called (i.e. the
    /// order `BYTE_CODE_CP` popped the parser stack: innermost function
    /// first). `promote_staged` drains in this order so that a line shared
    /// by nested closures lists the innermost function first in
    /// `line_lists`, which is what `find_breakpoint` relies on (spec.md
    /// §4.3) — `new_functions.keys()` alone gives no such guarantee, since
    /// `HashMap` iteration order is unrelated to insertion order.
    staging_order: Vec<Cp>,
    line_lists: HashMap<ScriptId, BTreeMap<u32, Vec<Cp>>>,
    active_breakpoints: Vec<Option<BreakpointHandle>>,
    next_breakpoint_index: i32,
}

impl BreakpointModel {
    pub fn new() -> Self {
        BreakpointModel {
            scripts: Vec::new(),
            next_script_id: 1,
            functions: HashMap::new(),
            new_functions: HashMap::new(),
            staging_order: Vec::new(),
            line_lists: HashMap::new(),
            active_breakpoints: Vec::new(),
            next_breakpoint_index: 0,
        }
    }

    pub fn next_script_id(&self) -> ScriptId {
        self.next_script_id
    }

    /// Finalize a script at the current `next_script_id` (spec.md §4.4.2:
    /// SOURCE_CODE_END decodes into the script table at `next_script_id`,
    /// which is advanced only once the whole parse unit finishes, via
    /// [`Self::advance_script_id`]).
    pub fn add_script(&mut self, name: String, source: String) -> ScriptId {
        let id = self.next_script_id;
        self.scripts.push(Script { id, name, source });
        id
    }

    /// Advance `next_script_id` once the parser stack for the current
    /// parse unit has fully drained.
    pub fn advance_script_id(&mut self) {
        self.next_script_id += 1;
    }

    pub fn script(&self, id: ScriptId) -> Result<&Script, ModelError> {
        if id == 0 || (id as usize) > self.scripts.len() {
            return Err(ModelError::NoSuchScript(id));
        }
        Ok(&self.scripts[(id - 1) as usize])
    }

    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Stage a freshly-finalized function (BYTE_CODE_CP). Not yet visible
    /// to `find_breakpoint`/`resolve_offset` until [`Self::promote_staged`].
    pub fn stage_function(&mut self, func: ParsedFunction) {
        let cp = func.byte_code_cp;
        self.new_functions.insert(cp, func);
        self.staging_order.push(cp);
    }

    /// Promote every staged function for `script_id` into the live
    /// tables, appending their lines into the per-script line list in
    /// staging order (innermost function first for any line they share).
    pub fn promote_staged(&mut self, script_id: ScriptId) {
        let staged = std::mem::take(&mut self.staging_order);
        for cp in staged {
            let Some(func) = self.new_functions.remove(&cp) else {
                continue;
            };
            let lines = self.line_lists.entry(script_id).or_default();
            for line in func.breakpoint_lines() {
                lines.entry(line).or_default().push(cp);
            }
            self.functions.insert(cp, func);
        }
    }

    pub fn function(&self, cp: Cp) -> Option<&ParsedFunction> {
        self.functions.get(&cp)
    }

    /// `find_breakpoint` (spec.md §4.3): the breakpoint at the innermost
    /// function covering `line` (the first entry in that line's function
    /// list, by construction of [`Self::promote_staged`]).
    pub fn find_breakpoint(
        &self,
        script_id: ScriptId,
        line: u32,
    ) -> Result<BreakpointHandle, ModelError> {
        self.script(script_id)?;
        let cp = self
            .line_lists
            .get(&script_id)
            .and_then(|lines| lines.get(&line))
            .and_then(|funcs| funcs.first())
            .ok_or(ModelError::NoBreakpointAtLine(script_id, line))?;
        self.functions
            .get(cp)
            .and_then(|f| f.handle_for_line(line))
            .ok_or(ModelError::NoBreakpointAtLine(script_id, line))
    }

    /// Offset -> breakpoint resolution for hit reporting (spec.md §4.3).
    pub fn resolve_offset(&self, cp: Cp, offset: u32) -> Option<(BreakpointHandle, bool)> {
        self.functions.get(&cp)?.resolve_offset(offset)
    }

    /// Every source line within `range` that carries a statement-boundary
    /// breakpoint in `script_id`, ascending (spec.md §3: the line list's
    /// other stated use besides `find_breakpoint`). Nested functions
    /// sharing a line contribute one entry for that line, not one per
    /// function, since this answers "where can a breakpoint go", not
    /// "which function owns it".
    pub fn get_possible_breakpoints(
        &self,
        script_id: ScriptId,
        range: std::ops::RangeInclusive<u32>,
    ) -> Result<Vec<u32>, ModelError> {
        self.script(script_id)?;
        Ok(self
            .line_lists
            .get(&script_id)
            .map(|lines| lines.range(range).map(|(&line, _)| line).collect())
            .unwrap_or_default())
    }

    pub fn breakpoint(&self, handle: BreakpointHandle) -> Option<&Breakpoint> {
        self.functions.get(&handle.func).map(|f| f.breakpoint(handle))
    }

    /// Mark the breakpoint active, assigning it the next sparse index.
    /// Fails (returns `false`) if already active.
    pub fn activate(&mut self, handle: BreakpointHandle) -> bool {
        let Some(func) = self.functions.get_mut(&handle.func) else {
            return false;
        };
        if func.breakpoint(handle).is_active() {
            return false;
        }
        let index = self.next_breakpoint_index;
        self.next_breakpoint_index += 1;
        func.breakpoint_mut(handle).active_index = index;
        if index as usize >= self.active_breakpoints.len() {
            self.active_breakpoints.resize(index as usize + 1, None);
        }
        self.active_breakpoints[index as usize] = Some(handle);
        true
    }

    /// Mark the breakpoint inactive, freeing its sparse slot. Fails
    /// (returns `false`) if already inactive.
    pub fn deactivate(&mut self, handle: BreakpointHandle) -> bool {
        let Some(func) = self.functions.get_mut(&handle.func) else {
            return false;
        };
        let bp = func.breakpoint_mut(handle);
        if !bp.is_active() {
            return false;
        }
        let index = bp.active_index;
        bp.active_index = -1;
        self.active_breakpoints[index as usize] = None;
        true
    }

    pub fn active_breakpoint_at(&self, index: i32) -> Option<BreakpointHandle> {
        self.active_breakpoints.get(index as usize).copied().flatten()
    }

    /// Release a function (RELEASE_BYTE_CODE_CP): clears it from every
    /// line-list cell, frees any active slots its breakpoints held, and
    /// removes the function entry. Idempotent against a function that
    /// only ever existed in the staging table.
    pub fn release(&mut self, cp: Cp) {
        if self.new_functions.remove(&cp).is_some() {
            self.staging_order.retain(|&staged| staged != cp);
            return;
        }
        let Some(func) = self.functions.remove(&cp) else {
            return;
        };
        if let Some(lines) = self.line_lists.get_mut(&func.script_id) {
            for line in func.breakpoint_lines() {
                if let Some(funcs) = lines.get_mut(&line) {
                    funcs.retain(|&owner| owner != cp);
                    if funcs.is_empty() {
                        lines.remove(&line);
                    }
                }
            }
        }
        for bp in &func.breakpoints {
            if bp.is_active() {
                self.active_breakpoints[bp.active_index as usize] = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_function(cp: Cp, script_id: ScriptId, lines: &[u32], offsets: &[u32]) -> ParsedFunction {
        ParsedFunction::new(
            cp,
            script_id,
            true,
            1,
            1,
            String::new(),
            String::new(),
            lines,
            offsets,
        )
    }

    #[test]
    fn find_breakpoint_rejects_script_zero() {
        let model = BreakpointModel::new();
        assert_eq!(
            model.find_breakpoint(0, 1),
            Err(ModelError::NoSuchScript(0))
        );
    }

    #[test]
    fn find_breakpoint_rejects_out_of_range_script() {
        let mut model = BreakpointModel::new();
        model.add_script(String::new(), "abc".to_string());
        assert_eq!(
            model.find_breakpoint(2, 1),
            Err(ModelError::NoSuchScript(2))
        );
    }

    #[test]
    fn find_breakpoint_resolves_to_innermost_function() {
        // The inner closure is staged first (its BYTE_CODE_CP pops before
        // the enclosing function's) but given a *larger* cpointer value
        // than the outer one, so this can only pass by honoring staging
        // order, not by coincidentally matching `HashMap` iteration order
        // or cpointer numeric order.
        let mut model = BreakpointModel::new();
        let script_id = model.add_script(String::new(), "a\nb\nc".to_string());
        model.stage_function(sample_function(99, script_id, &[2], &[20]));
        model.stage_function(sample_function(1, script_id, &[2], &[10]));
        model.promote_staged(script_id);

        let handle = model.find_breakpoint(script_id, 2).unwrap();
        assert_eq!(handle.func, 99);
    }

    #[test]
    fn promote_staged_preserves_staging_order_across_many_functions() {
        // A larger batch makes a HashMap-iteration-order regression much
        // more likely to be caught: with enough entries, `RandomState`
        // iteration almost never matches insertion order by chance.
        let mut model = BreakpointModel::new();
        let script_id = model.add_script(String::new(), "a\nb".to_string());
        let cps: Vec<Cp> = vec![40, 7, 23, 1, 99, 15, 62, 3, 88, 21];
        for &cp in &cps {
            model.stage_function(sample_function(cp, script_id, &[1], &[cp]));
        }
        model.promote_staged(script_id);

        let handle = model.find_breakpoint(script_id, 1).unwrap();
        assert_eq!(handle.func, cps[0]);
    }

    #[test]
    fn offset_resolution_exact_inexact_and_below_first() {
        let mut model = BreakpointModel::new();
        let script_id = model.add_script(String::new(), "abc".to_string());
        model.stage_function(sample_function(42, script_id, &[25], &[64, 125]));
        model.promote_staged(script_id);

        let (handle, exact) = model.resolve_offset(42, 125).unwrap();
        assert!(exact);
        assert_eq!(model.breakpoint(handle).unwrap().offset, 125);

        let (handle, exact) = model.resolve_offset(42, 100).unwrap();
        assert!(!exact);
        assert_eq!(model.breakpoint(handle).unwrap().offset, 64);

        let (handle, exact) = model.resolve_offset(42, 10).unwrap();
        assert!(exact);
        assert_eq!(model.breakpoint(handle).unwrap().offset, 64);
    }

    #[test]
    fn activate_then_deactivate_round_trips() {
        let mut model = BreakpointModel::new();
        let script_id = model.add_script(String::new(), "a\nb".to_string());
        model.stage_function(sample_function(1, script_id, &[1], &[10]));
        model.promote_staged(script_id);
        let handle = model.find_breakpoint(script_id, 1).unwrap();

        assert!(model.activate(handle));
        assert!(!model.activate(handle));
        assert_eq!(model.breakpoint(handle).unwrap().active_index, 0);
        assert_eq!(model.active_breakpoint_at(0), Some(handle));

        assert!(model.deactivate(handle));
        assert!(!model.deactivate(handle));
        assert_eq!(model.breakpoint(handle).unwrap().active_index, -1);
        assert_eq!(model.active_breakpoint_at(0), None);
    }

    #[test]
    fn release_clears_active_slot_and_line_list() {
        let mut model = BreakpointModel::new();
        let script_id = model.add_script(String::new(), "a\nb\nc\nd".to_string());
        model.stage_function(sample_function(7, script_id, &[1], &[10]));
        model.promote_staged(script_id);
        let handle = model.find_breakpoint(script_id, 1).unwrap();
        model.activate(handle);
        model.activate(handle); // no-op, already active
        assert!(model.active_breakpoint_at(0).is_some());

        model.release(7);

        assert_eq!(model.active_breakpoint_at(0), None);
        assert!(model.function(7).is_none());
        assert_eq!(
            model.find_breakpoint(script_id, 1),
            Err(ModelError::NoBreakpointAtLine(script_id, 1))
        );
    }

    #[test]
    fn possible_breakpoints_lists_lines_in_range_across_functions() {
        let mut model = BreakpointModel::new();
        let script_id = model.add_script(String::new(), "a\nb\nc\nd\ne".to_string());
        model.stage_function(sample_function(1, script_id, &[2, 4], &[10, 20]));
        model.stage_function(sample_function(2, script_id, &[2, 3], &[30, 40]));
        model.promote_staged(script_id);

        assert_eq!(
            model.get_possible_breakpoints(script_id, 1..=5).unwrap(),
            vec![2, 3, 4]
        );
        assert_eq!(
            model.get_possible_breakpoints(script_id, 3..=4).unwrap(),
            vec![3, 4]
        );
        assert!(model.get_possible_breakpoints(0, 1..=5).is_err());
    }

    #[test]
    fn release_is_idempotent_against_staged_only_function() {
        let mut model = BreakpointModel::new();
        let script_id = model.add_script(String::new(), "a".to_string());
        model.stage_function(sample_function(3, script_id, &[1], &[10]));
        model.release(3);
        model.release(3); // idempotent
        assert!(model.function(3).is_none());
    }

    #[test]
    fn releasing_a_staged_function_before_promotion_does_not_poison_later_promotes() {
        let mut model = BreakpointModel::new();
        let script_id = model.add_script(String::new(), "a\nb".to_string());
        model.stage_function(sample_function(1, script_id, &[1], &[10]));
        model.stage_function(sample_function(2, script_id, &[2], &[20]));
        model.release(1);
        model.promote_staged(script_id);

        assert!(model.function(1).is_none());
        assert!(model.function(2).is_some());
        assert_eq!(model.find_breakpoint(script_id, 2).unwrap().func, 2);
        assert_eq!(
            model.find_breakpoint(script_id, 1),
            Err(ModelError::NoBreakpointAtLine(script_id, 1))
        );
    }
}
