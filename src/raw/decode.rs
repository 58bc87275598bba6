//! RAW decoder: a cursor over the input bits, one pass per record in schedule order.

use super::tree::{mask, IntFormat};
use crate::ast::{Endianness, ExtBit, LengthUnit, ResolvedSchema, TypeSpec};
use crate::bits::{BitOrder, BitReader};
use crate::error::{CodecError, ErrorContext, ErrorKind};
use crate::layout::{any_holds, Check, FieldLayout, Layout, PathStep};
use crate::value::{Slot, Value};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::cell::Cell;
use tracing::debug;

const MAX_DEPTH: usize = 64;

/// What the enclosing record already knows about a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hint {
    None,
    /// Union alternative selected by crosstag.
    Alternative(usize),
    /// Element count from a `unit(elements)` length field.
    Count(usize),
}

pub(crate) struct RawDecoder<'a> {
    schema: &'a ResolvedSchema,
    ctx: &'a ErrorContext,
    depth: Cell<usize>,
}

/// Per-record decode state.
struct RecordCursor {
    /// Absolute end of the bits this record may use.
    end: usize,
    /// High-water position: the cursor returns here after out-of-order decoding.
    last_pos: usize,
    slots: Vec<Slot>,
    start_of: Vec<Option<usize>>,
    /// Remaining bits announced by each length source.
    budget: Vec<Option<usize>>,
    /// Element count announced by each `unit(elements)` source.
    count: Vec<Option<usize>>,
    ptr_value: Vec<Option<i64>>,
    group_limit: Vec<Option<usize>>,
}

impl RecordCursor {
    fn new(fields: usize, groups: usize, end: usize) -> Self {
        RecordCursor {
            end,
            last_pos: 0,
            slots: vec![Slot::Unbound; fields],
            start_of: vec![None; fields],
            budget: vec![None; fields],
            count: vec![None; fields],
            ptr_value: vec![None; fields],
            group_limit: vec![None; groups],
        }
    }

    fn limit(&self, r: &BitReader) -> usize {
        self.end.saturating_sub(r.pos())
    }
}

impl<'a> RawDecoder<'a> {
    pub fn new(schema: &'a ResolvedSchema, ctx: &'a ErrorContext) -> Self {
        RawDecoder {
            schema,
            ctx,
            depth: Cell::new(0),
        }
    }

    /// Decode one value of `spec` from at most `limit` bits. Returns the value and the bits
    /// consumed; on error the cursor is left where it was.
    pub fn decode(
        &self,
        spec: &TypeSpec,
        r: &mut BitReader,
        limit: usize,
        order: BitOrder,
        hint: Hint,
    ) -> Result<(Value, usize), CodecError> {
        let start = r.pos();
        let depth = self.depth.get();
        if depth >= MAX_DEPTH {
            return Err(self.ctx.error(
                ErrorKind::InvalidMessage,
                format!("Type nesting exceeds {} levels.", MAX_DEPTH),
            ));
        }
        self.depth.set(depth + 1);
        let res = self.decode_value(spec, r, limit, order, hint);
        self.depth.set(depth);
        match res {
            Ok(v) => Ok((v, r.pos().saturating_sub(start))),
            Err(e) => {
                r.set_pos(start);
                Err(e)
            }
        }
    }

    fn short(&self, spec: &TypeSpec, r: &BitReader, need: usize) -> CodecError {
        if r.remaining() < need {
            self.ctx.error(
                ErrorKind::IncompleteMessage,
                format!("There is not enough bits in the buffer to decode type {}.", self.schema.display_name(spec)),
            )
        } else {
            self.ctx.error(
                ErrorKind::LengthError,
                format!("Type {} does not fit in the available {} bits.", self.schema.display_name(spec), need),
            )
        }
    }

    fn read_int(&self, spec: &TypeSpec, r: &mut BitReader, limit: usize, format: &IntFormat) -> Result<i64, CodecError> {
        let need = format.bits as usize;
        if need > limit || need > r.remaining() {
            return Err(self.short(spec, r, need));
        }
        let raw = match format.endianness {
            Some(e) if format.bits % 8 == 0 && format.bits > 8 => {
                let nb = need / 8;
                let mut buf = [0u8; 8];
                for b in buf[..nb].iter_mut() {
                    *b = r.read_bits(8, format.order).ok_or_else(|| self.short(spec, r, need))? as u8;
                }
                match e {
                    Endianness::Big => BigEndian::read_uint(&buf[..nb], nb),
                    Endianness::Little => LittleEndian::read_uint(&buf[..nb], nb),
                }
            }
            _ => r.read_bits(format.bits, format.order).ok_or_else(|| self.short(spec, r, need))?,
        };
        Ok(sign_extend(raw, format))
    }

    fn read_octets(&self, spec: &TypeSpec, r: &mut BitReader, limit: usize, fixed: Option<usize>, order: BitOrder) -> Result<Vec<u8>, CodecError> {
        let count = match fixed {
            Some(n) => {
                if n * 8 > limit || n * 8 > r.remaining() {
                    return Err(self.short(spec, r, n * 8));
                }
                n
            }
            None => limit.min(r.remaining()) / 8,
        };
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(r.read_bits(8, order).ok_or_else(|| self.short(spec, r, 8))? as u8);
        }
        Ok(out)
    }

    fn decode_value(&self, spec: &TypeSpec, r: &mut BitReader, limit: usize, order: BitOrder, hint: Hint) -> Result<Value, CodecError> {
        match self.schema.spec_of(spec) {
            TypeSpec::Integer { bits, signed, endianness } => {
                let format = IntFormat {
                    bits: *bits,
                    signed: *signed,
                    endianness: *endianness,
                    order,
                };
                Ok(Value::Integer(self.read_int(spec, r, limit, &format)?))
            }
            TypeSpec::Boolean { bits } => {
                let format = IntFormat {
                    bits: *bits,
                    signed: false,
                    endianness: None,
                    order,
                };
                Ok(Value::Bool(self.read_int(spec, r, limit, &format)? != 0))
            }
            TypeSpec::Enumerated { bits, items } => {
                let format = IntFormat {
                    bits: *bits,
                    signed: items.iter().any(|(_, v)| *v < 0),
                    endianness: None,
                    order,
                };
                let code = self.read_int(spec, r, limit, &format)?;
                match items.iter().find(|(_, v)| *v == code) {
                    Some((name, _)) => Ok(Value::Enum(name.clone())),
                    None => Err(self.ctx.error(
                        ErrorKind::InvalidMessage,
                        format!("Unknown enumerated value {} for type {}.", code, self.schema.display_name(spec)),
                    )),
                }
            }
            TypeSpec::OctetString { octets } => Ok(Value::Octets(self.read_octets(spec, r, limit, *octets, order)?)),
            TypeSpec::CharString { chars } => {
                let bytes = self.read_octets(spec, r, limit, *chars, order)?;
                String::from_utf8(bytes).map(Value::Chars).map_err(|_| {
                    self.ctx.error(
                        ErrorKind::InvalidMessage,
                        format!("Invalid character data for type {}.", self.schema.display_name(spec)),
                    )
                })
            }
            TypeSpec::BitString { bits } => {
                let count = match bits {
                    Some(n) => {
                        if *n > limit || *n > r.remaining() {
                            return Err(self.short(spec, r, *n));
                        }
                        *n
                    }
                    None => limit.min(r.remaining()),
                };
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(r.read_bits(1, order).ok_or_else(|| self.short(spec, r, 1))? != 0);
                }
                Ok(Value::Bits(out))
            }
            TypeSpec::Union(u) => {
                if let Hint::Alternative(k) = hint {
                    let alt = u.alternatives.get(k).ok_or_else(|| {
                        self.ctx.error(ErrorKind::InvalidMessage, format!("Union {} has no alternative {}.", self.schema.display_name(spec), k))
                    })?;
                    let (v, _) = self.decode(&alt.spec, r, limit, order, Hint::None)?;
                    return Ok(Value::union(&alt.name, v));
                }
                let mut last_err = None;
                for alt in &u.alternatives {
                    match self.decode(&alt.spec, r, limit, order, Hint::None) {
                        Ok((v, _)) => return Ok(Value::union(&alt.name, v)),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    self.ctx.error(
                        ErrorKind::InvalidMessage,
                        format!("No alternative of union {} matches.", self.schema.display_name(spec)),
                    )
                }))
            }
            TypeSpec::RecordOf(ro) => {
                let mut items = Vec::new();
                let mut used = 0usize;
                match hint {
                    Hint::Count(n) => {
                        // every element takes at least one bit, so `n` is bounded by the limit
                        let min_bits = self.schema.fixed_bits(&ro.element).unwrap_or(1).max(1);
                        let need = n.saturating_mul(min_bits);
                        if need > limit {
                            return Err(self.short(spec, r, need));
                        }
                        for k in 0..n {
                            let _g = self.ctx.enter(format!("Element {}: ", k));
                            let (v, len) = self.decode(&ro.element, r, limit - used, order, Hint::None)?;
                            if len == 0 {
                                let kind = if r.remaining() == 0 {
                                    ErrorKind::IncompleteMessage
                                } else {
                                    ErrorKind::LengthError
                                };
                                return Err(self.ctx.error(kind, "Element decoded from zero bits."));
                            }
                            used += len;
                            items.push(v);
                        }
                    }
                    _ => {
                        while used < limit {
                            match self.decode(&ro.element, r, limit - used, order, Hint::None) {
                                Ok((v, len)) if len > 0 => {
                                    used += len;
                                    items.push(v);
                                }
                                _ => break,
                            }
                        }
                    }
                }
                Ok(Value::List(items))
            }
            TypeSpec::Struct(def) => {
                let layout = self
                    .schema
                    .layout(&def.name)
                    .ok_or_else(|| self.ctx.error(ErrorKind::UnknownType, format!("Unknown type {}.", def.name)))?;
                if layout.is_set() {
                    self.decode_set(layout, r, limit, order)
                } else {
                    self.decode_record(layout, r, limit, order)
                }
            }
            TypeSpec::Named(n) => Err(self.ctx.error(ErrorKind::UnknownType, format!("Unknown type {}.", n))),
        }
    }

    fn skip_padding(&self, layout: &Layout, unit: u32, r: &mut BitReader, end: usize) -> Result<(), CodecError> {
        r.skip_padding(unit);
        if r.pos() > end {
            let kind = if r.pos() > r.len_bits() {
                ErrorKind::IncompleteMessage
            } else {
                ErrorKind::LengthError
            };
            return Err(self.ctx.error(kind, format!("There is not enough bits for the padding of type {}.", layout.name)));
        }
        Ok(())
    }

    fn decode_record(&self, layout: &Layout, r: &mut BitReader, limit: usize, inherited: BitOrder) -> Result<Value, CodecError> {
        let order = layout.bit_order.unwrap_or(inherited);
        let start = r.pos();
        let end = start + limit;
        let mut cur = RecordCursor::new(layout.fields.len(), layout.ext_groups.len(), end);
        self.skip_padding(layout, layout.prepadding, r, end)?;
        if layout.extension_bit != ExtBit::No {
            cur.end = r.pos() + ext_limit(r, cur.limit(r), layout.extension_bit, order);
        }
        cur.last_pos = r.pos();

        for (i, f) in layout.fields.iter().enumerate() {
            if f.delayed {
                self.reserve(layout, i, r, &mut cur, order)?;
            } else {
                self.decode_record_field(layout, i, r, &mut cur, order, false)?;
            }
            cur.last_pos = cur.last_pos.max(r.pos());
            if !f.dependents.is_empty() {
                for &j in &f.dependents {
                    if let (Some(p), Slot::Unbound) = (cur.start_of[j], &cur.slots[j]) {
                        r.set_pos(p);
                        self.decode_record_field(layout, j, r, &mut cur, order, true)?;
                    }
                }
                r.set_pos(cur.last_pos);
            }
        }

        r.set_pos(cur.last_pos);
        for (s, f) in layout.fields.iter().enumerate() {
            if let (LengthUnit::Bits(unit), Some(left)) = (f.unit, cur.budget[s]) {
                if left >= unit as usize {
                    let kind = if cur.limit(r) == 0 {
                        ErrorKind::IncompleteMessage
                    } else {
                        ErrorKind::LengthError
                    };
                    return Err(self.ctx.error(
                        kind,
                        format!("Field '{}' announces {} more bits than were decoded.", f.name, left),
                    ));
                }
            }
        }
        if !any_holds(&cur.slots, &layout.presence) {
            return Err(self.ctx.error(
                ErrorKind::InvalidMessage,
                format!("Presence condition of type {} does not hold.", layout.name),
            ));
        }
        self.skip_padding(layout, layout.padding, r, end)?;
        Ok(Value::Record(cur.slots))
    }

    /// Reserve the fixed span of a delayed field and move past it. The span counts against
    /// the length budgets and the extension group the field belongs to.
    fn reserve(&self, layout: &Layout, i: usize, r: &mut BitReader, cur: &mut RecordCursor, order: BitOrder) -> Result<(), CodecError> {
        let f = &layout.fields[i];
        let _g = self.ctx.enter(format!("Field '{}': ", f.name));
        let bits = f.fixed_bits.unwrap_or(0);
        if let Some(g) = f.ext_group {
            if cur.group_limit[g].is_none() {
                cur.group_limit[g] = Some(ext_limit(r, cur.limit(r), layout.ext_groups[g].mode, order));
            }
        }
        let room = f
            .lengthof
            .iter()
            .filter(|&&s| matches!(layout.fields[s].unit, LengthUnit::Bits(_)))
            .filter_map(|&s| cur.budget[s])
            .chain(f.ext_group.and_then(|g| cur.group_limit[g]))
            .fold(cur.limit(r), usize::min);
        if bits > room {
            if f.optional {
                debug!(field = %f.name, "delayed optional field omitted: no room");
                cur.slots[i] = Slot::Omit;
                return Ok(());
            }
            let kind = if r.remaining() < bits {
                ErrorKind::IncompleteMessage
            } else {
                ErrorKind::LengthError
            };
            return Err(self.ctx.error(kind, format!("There is not enough bits to reserve {} bits for the field.", bits)));
        }
        cur.start_of[i] = Some(r.pos());
        r.set_pos(r.pos() + bits);
        if let Some(g) = f.ext_group {
            if let Some(left) = cur.group_limit[g].as_mut() {
                *left = left.saturating_sub(bits);
            }
        }
        for &s in &f.lengthof {
            if let Some(left) = cur.budget[s].as_mut() {
                *left = left.saturating_sub(bits);
            }
        }
        Ok(())
    }

    fn select_crosstag(f: &FieldLayout, slots: &[Slot]) -> Option<usize> {
        f.crosstag
            .iter()
            .find(|rule| !rule.checks.is_empty() && any_holds(slots, &rule.checks))
            .or_else(|| f.crosstag.iter().find(|rule| rule.checks.is_empty()))
            .map(|rule| rule.alternative)
    }

    /// Absolute position of a pointer target, `None` when unknown or out of range.
    fn pointer_target(&self, layout: &Layout, source: usize, r: &BitReader, cur: &RecordCursor) -> Option<usize> {
        let src = &layout.fields[source];
        let value = cur.ptr_value[source]?;
        let base = cur.start_of[src.ptrbase.unwrap_or(source)]? as i64;
        let pos = value
            .checked_mul(src.ptrunit as i64)?
            .checked_add(base)?
            .checked_add(src.ptroffset)?;
        if pos < r.pos() as i64 || pos > cur.end as i64 {
            return None;
        }
        Some(pos as usize)
    }

    fn decode_record_field(
        &self,
        layout: &Layout,
        i: usize,
        r: &mut BitReader,
        cur: &mut RecordCursor,
        order: BitOrder,
        delayed: bool,
    ) -> Result<(), CodecError> {
        let f = &layout.fields[i];
        let _g = self.ctx.enter(format!("Field '{}': ", f.name));
        let pos0 = r.pos();
        if !delayed {
            cur.start_of[i] = Some(pos0);
        }

        let group = if delayed { None } else { f.ext_group };
        if let Some(g) = group {
            if cur.group_limit[g].is_none() {
                cur.group_limit[g] = Some(ext_limit(r, cur.limit(r), layout.ext_groups[g].mode, order));
            }
        }
        let group_limit = group.and_then(|g| cur.group_limit[g]);

        let mut hint = Hint::None;
        let mut crosstag_failed = false;
        if !f.crosstag.is_empty() {
            match Self::select_crosstag(f, &cur.slots) {
                Some(k) => hint = Hint::Alternative(k),
                None => crosstag_failed = true,
            }
        }
        let budget = f
            .lengthof
            .iter()
            .filter(|&&s| matches!(layout.fields[s].unit, LengthUnit::Bits(_)))
            .filter_map(|&s| cur.budget[s])
            .min();
        let count = f.lengthof.iter().find_map(|&s| cur.count[s]);
        let seek = match f.pointerof {
            Some(s) => Some(self.pointer_target(layout, s, r, cur)),
            None => None,
        };
        let avail = if delayed { f.fixed_bits.unwrap_or(0) } else { cur.limit(r) };

        if f.optional {
            let reason = if avail == 0 {
                Some("no data left")
            } else if budget == Some(0) || count == Some(0) {
                Some("length field is zero")
            } else if group_limit == Some(0) {
                Some("extension group exhausted")
            } else if seek == Some(None) {
                Some("pointer out of range")
            } else if !any_holds(&cur.slots, &f.presence) {
                Some("presence condition false")
            } else if crosstag_failed {
                Some("no crosstag rule matches")
            } else {
                None
            };
            if let Some(reason) = reason {
                debug!(type_name = %layout.name, field = %f.name, reason, "optional field omitted");
                cur.slots[i] = Slot::Omit;
                return Ok(());
            }
        } else if seek == Some(None) {
            return Err(self.ctx.error(ErrorKind::InvalidMessage, "Pointer to the field points out of the message."));
        }

        let mut limit = match seek {
            Some(Some(p)) => {
                r.set_pos(p);
                cur.end - p
            }
            _ => avail,
        };
        if !delayed {
            limit = [Some(limit), budget, group_limit].into_iter().flatten().min().unwrap_or(limit);
        }
        if let (Some(n), true) = (count, f.repeatable) {
            hint = Hint::Count(n);
        }
        let (value, used) = match self.decode(&f.spec, r, limit, order, hint) {
            Ok((_, 0)) if f.optional => {
                debug!(type_name = %layout.name, field = %f.name, "optional field omitted: empty");
                cur.slots[i] = Slot::Omit;
                r.set_pos(pos0);
                return Ok(());
            }
            Ok(ok) => ok,
            Err(e) if f.optional => {
                debug!(type_name = %layout.name, field = %f.name, error = %e, "optional field omitted: decode failed");
                cur.slots[i] = Slot::Omit;
                r.set_pos(pos0);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if delayed && Some(used) != f.fixed_bits {
            return Err(self.ctx.error(
                ErrorKind::LengthError,
                format!("Delayed field decoded {} bits instead of its reserved length.", used),
            ));
        }
        cur.slots[i] = Slot::Present(value);
        if let Some(tag) = layout.tag_of(i) {
            let matched = if tag.is_otherwise() {
                !layout
                    .tags
                    .iter()
                    .any(|t| t.field != i && !t.is_otherwise() && any_holds(&cur.slots, &t.checks))
            } else {
                any_holds(&cur.slots, &tag.checks)
            };
            if !matched {
                if f.optional {
                    debug!(type_name = %layout.name, field = %f.name, "optional field omitted: tag mismatch");
                    cur.slots[i] = Slot::Omit;
                    r.set_pos(pos0);
                    return Ok(());
                }
                return Err(self.ctx.error(ErrorKind::InvalidMessage, "Tag of the field does not match."));
            }
        }

        if !delayed {
            if let Some(g) = group {
                if let Some(left) = cur.group_limit[g].as_mut() {
                    *left = left.saturating_sub(used);
                }
            }
            for &s in &f.lengthof {
                if let Some(left) = cur.budget[s].as_mut() {
                    *left = left.saturating_sub(used);
                }
            }
        }
        if !f.lengthto.is_empty() {
            self.record_length(f, i, cur)?;
        }
        if f.pointerto.is_some() {
            cur.ptr_value[i] = cur.slots[i].value().and_then(Value::as_i64);
        }
        Ok(())
    }

    /// Turn a decoded length field into a budget and store `value - offset` in the field.
    fn record_length(&self, f: &FieldLayout, i: usize, cur: &mut RecordCursor) -> Result<(), CodecError> {
        let slot = match &mut cur.slots[i] {
            Slot::Present(v) => v,
            _ => return Ok(()),
        };
        let target = match f.lengthindex {
            Some(k) => match slot {
                Value::Record(fields) => match fields.get_mut(k) {
                    Some(Slot::Present(v)) => v,
                    _ => return Err(self.ctx.error(ErrorKind::InvalidMessage, "Length sub-field is missing.")),
                },
                _ => return Err(self.ctx.error(ErrorKind::InvalidMessage, "Length field is not a record.")),
            },
            None => slot,
        };
        let raw = target
            .as_i64()
            .ok_or_else(|| self.ctx.error(ErrorKind::InvalidMessage, "Length field is not an integer."))?;
        let n = raw - f.lengthto_offset;
        if n < 0 {
            return Err(self.ctx.error(ErrorKind::LengthError, format!("Negative length {} decoded.", n)));
        }
        *target = Value::Integer(n);
        match f.unit {
            LengthUnit::Bits(unit) => {
                let bits = (n as usize)
                    .checked_mul(unit as usize)
                    .ok_or_else(|| self.ctx.error(ErrorKind::LengthError, format!("Length {} is too large.", n)))?;
                cur.budget[i] = Some(bits);
            }
            LengthUnit::Elements => cur.count[i] = Some(n as usize),
        }
        Ok(())
    }

    /// Order used to read the value a check path ends at.
    fn path_order(&self, layout: &Layout, check: &Check, order: BitOrder) -> BitOrder {
        let mut order = order;
        let mut spec = layout.fields[check.field()].spec.clone();
        for step in &check.path[1..] {
            match (self.schema.spec_of(&spec), step) {
                (TypeSpec::Struct(def), PathStep::Field(k)) => {
                    if let Some(inner) = self.schema.layout(&def.name) {
                        order = inner.bit_order.unwrap_or(order);
                    }
                    spec = def.fields[*k].spec.clone();
                }
                (TypeSpec::Union(u), PathStep::Alt(name)) => {
                    if let Some(a) = u.alternatives.iter().find(|a| &a.name == name) {
                        spec = a.spec.clone();
                    }
                }
                _ => break,
            }
        }
        order
    }

    /// Read a tag key at its fixed offset from `pos`. `None`: the key cannot be probed.
    fn probe(&self, layout: &Layout, check: &Check, r: &BitReader, pos: usize, order: BitOrder) -> Option<bool> {
        let offset = check.fixed_offset?;
        let expected = check.expected.as_ref()?;
        if !matches!(
            self.schema.spec_of(&check.spec),
            TypeSpec::Integer { .. } | TypeSpec::Enumerated { .. } | TypeSpec::Boolean { .. } | TypeSpec::OctetString { .. }
        ) {
            return None;
        }
        let bits = self.schema.fixed_bits(&check.spec)?;
        let mut probe = r.clone();
        probe.set_pos(pos + offset);
        let order = self.path_order(layout, check, order);
        Some(match self.decode(&check.spec, &mut probe, bits, order, Hint::None) {
            Ok((v, _)) => &v == expected,
            Err(_) => false,
        })
    }

    fn decode_set(&self, layout: &Layout, r: &mut BitReader, limit: usize, inherited: BitOrder) -> Result<Value, CodecError> {
        let order = layout.bit_order.unwrap_or(inherited);
        let start = r.pos();
        let end = start + limit;
        self.skip_padding(layout, layout.prepadding, r, end)?;
        let n = layout.fields.len();
        let mut slots: Vec<Slot> = layout
            .fields
            .iter()
            .map(|f| if f.optional { Slot::Omit } else { Slot::Unbound })
            .collect();
        let mut seen = vec![0usize; n];

        while end > r.pos() {
            let pos = r.pos();
            let matched = self
                .match_tagged(layout, r, end, order, &mut slots, &seen)
                .or_else(|| self.match_untagged(layout, r, end, order, &mut slots, &seen))
                .or_else(|| self.match_otherwise(layout, r, end, order, &mut slots, &seen));
            match matched {
                Some(i) => seen[i] += 1,
                None => {
                    r.set_pos(pos);
                    debug!(type_name = %layout.name, remaining = end - pos, "set decoding stopped: no field matches");
                    break;
                }
            }
        }

        for (i, f) in layout.fields.iter().enumerate() {
            if !f.optional && seen[i] == 0 {
                let kind = if end <= r.pos() {
                    ErrorKind::IncompleteMessage
                } else {
                    ErrorKind::InvalidMessage
                };
                return Err(self.ctx.error(kind, format!("Missing mandatory field '{}' of type {}.", f.name, layout.name)));
            }
        }
        if !any_holds(&slots, &layout.presence) {
            return Err(self.ctx.error(
                ErrorKind::InvalidMessage,
                format!("Presence condition of type {} does not hold.", layout.name),
            ));
        }
        self.skip_padding(layout, layout.padding, r, end)?;
        Ok(Value::Record(slots))
    }

    /// Decode field `i` at the cursor and keep it when `checks` hold afterwards.
    fn try_set_field(
        &self,
        layout: &Layout,
        i: usize,
        r: &mut BitReader,
        end: usize,
        order: BitOrder,
        slots: &mut [Slot],
        checks: &[Check],
    ) -> bool {
        let f = &layout.fields[i];
        let _g = self.ctx.enter(format!("Field '{}': ", f.name));
        let pos = r.pos();
        let limit = end - pos;
        if f.repeatable && layout.tag_of(i).is_none() {
            let element = match self.schema.spec_of(&f.spec) {
                TypeSpec::RecordOf(ro) => ro.element.as_ref(),
                _ => return false,
            };
            return match self.decode(element, r, limit, order, Hint::None) {
                Ok((v, used)) if used > 0 => {
                    match &mut slots[i] {
                        Slot::Present(Value::List(items)) => items.push(v),
                        other => *other = Slot::Present(Value::List(vec![v])),
                    }
                    true
                }
                _ => {
                    r.set_pos(pos);
                    false
                }
            };
        }
        match self.decode(&f.spec, r, limit, order, Hint::None) {
            Ok((v, _)) => {
                let old = std::mem::replace(&mut slots[i], Slot::Present(v));
                if checks.is_empty() || any_holds(slots, checks) {
                    true
                } else {
                    slots[i] = old;
                    r.set_pos(pos);
                    false
                }
            }
            Err(_) => false,
        }
    }

    /// Tagged fields not seen yet: fixed-offset probes first, then decode and verify.
    fn match_tagged(&self, layout: &Layout, r: &mut BitReader, end: usize, order: BitOrder, slots: &mut [Slot], seen: &[usize]) -> Option<usize> {
        let pos = r.pos();
        for tag in layout.tags.iter().filter(|t| !t.is_otherwise() && seen[t.field] == 0) {
            let probes: Vec<Option<bool>> = tag.checks.iter().map(|c| self.probe(layout, c, r, pos, order)).collect();
            if probes.iter().all(|p| *p == Some(false)) {
                continue;
            }
            if self.try_set_field(layout, tag.field, r, end, order, slots, &tag.checks) {
                return Some(tag.field);
            }
        }
        None
    }

    /// Untagged fields; a repeatable field matches once per element.
    fn match_untagged(&self, layout: &Layout, r: &mut BitReader, end: usize, order: BitOrder, slots: &mut [Slot], seen: &[usize]) -> Option<usize> {
        (0..layout.fields.len())
            .filter(|&i| layout.fields[i].tag.is_none())
            .filter(|&i| seen[i] == 0 || layout.fields[i].repeatable)
            .find(|&i| self.try_set_field(layout, i, r, end, order, slots, &[]))
    }

    fn match_otherwise(&self, layout: &Layout, r: &mut BitReader, end: usize, order: BitOrder, slots: &mut [Slot], seen: &[usize]) -> Option<usize> {
        layout
            .tags
            .iter()
            .filter(|t| t.is_otherwise() && seen[t.field] == 0)
            .map(|t| t.field)
            .find(|&i| self.try_set_field(layout, i, r, end, order, slots, &[]))
    }
}

fn sign_extend(raw: u64, format: &IntFormat) -> i64 {
    let bits = format.bits;
    if format.signed && bits < 64 && (raw >> (bits - 1)) & 1 == 1 {
        (raw | !mask(bits)) as i64
    } else {
        raw as i64
    }
}

/// Bits from the cursor up to the end of the octet carrying the terminating extension bit;
/// `limit` when no terminator is found.
fn ext_limit(r: &BitReader, limit: usize, mode: ExtBit, order: BitOrder) -> usize {
    if mode == ExtBit::No {
        return limit;
    }
    let pos = r.pos();
    let end = pos + limit;
    let mut octet = pos / 8;
    while octet * 8 < end {
        let flag = match r.octet_flag(octet, order) {
            Some(f) => f,
            None => break,
        };
        let terminal = match mode {
            ExtBit::Reverse => !flag,
            _ => flag,
        };
        if terminal {
            return limit.min((octet + 1) * 8 - pos);
        }
        octet += 1;
    }
    limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension_follows_width() {
        let format = IntFormat {
            bits: 4,
            signed: true,
            endianness: None,
            order: BitOrder::Lsb,
        };
        assert_eq!(sign_extend(0b1111, &format), -1);
        assert_eq!(sign_extend(0b0111, &format), 7);
    }

    #[test]
    fn extension_scan_stops_at_terminal_octet() {
        let data = [0x01, 0x02, 0x80, 0x00];
        let r = BitReader::new(&data);
        assert_eq!(ext_limit(&r, 32, ExtBit::Yes, BitOrder::Msb), 24);
        assert_eq!(ext_limit(&r, 32, ExtBit::Reverse, BitOrder::Msb), 8);
        assert_eq!(ext_limit(&r, 32, ExtBit::Yes, BitOrder::Lsb), 8);
    }
}
