//! Layout analysis of record/set types.
//!
//! [`analyze`] turns the per-field RAW/JSON attributes into a flat table of facts that the
//! coders read without re-deriving anything per call:
//!
//! | fact | source attribute |
//! |------|------------------|
//! | length targets / sources, unit, offset | `lengthto`, `unit`, `offset`, `lengthindex` |
//! | pointer target / source / base | `pointerto`, `ptrunit`, `ptroffset`, `pointerbase` |
//! | tag rule per field (OTHERWISE = no checks) | type-level `tag` |
//! | crosstag alternatives, delayed decode and dependents | `crosstag` |
//! | extension-bit group per field | type-level `extbitgroup` |
//!
//! Delayed decode: in a record, a field whose crosstag checks read a later field (or a field
//! that is itself still pending) cannot be interpreted when the cursor reaches it. Its bits
//! are reserved and it is decoded right after the last field it depends on. The resulting
//! schedule is a topological order of the dependency graph; a cycle is a definition error.

use crate::ast::*;
use crate::bits::BitOrder;
use crate::error::SchemaError;
use crate::value::{Slot, Value};
use tracing::debug;

/// One step of a check path: a record/set field or a union alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Field(usize),
    Alt(String),
}

/// Resolved equality check `path == expected` (`None` = omitted).
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub path: Vec<PathStep>,
    pub expected: Option<Value>,
    /// Spec of the value the path ends at.
    pub spec: TypeSpec,
    /// Bit offset of the checked value from the start of the first field, when static.
    pub fixed_offset: Option<usize>,
}

impl Check {
    /// Index of the field the path starts at.
    pub fn field(&self) -> usize {
        match self.path.first() {
            Some(PathStep::Field(i)) => *i,
            _ => 0,
        }
    }

    /// Evaluate against the fields of a record/set value. A path that cannot be followed
    /// (unbound field, other union alternative selected) does not hold.
    pub fn holds(&self, slots: &[Slot]) -> bool {
        match walk(slots, &self.path) {
            Some(found) => found == self.expected.as_ref(),
            None => false,
        }
    }
}

/// ORed checks; an empty list holds.
pub fn any_holds(slots: &[Slot], checks: &[Check]) -> bool {
    checks.is_empty() || checks.iter().any(|c| c.holds(slots))
}

/// `None`: the path cannot be followed. `Some(None)`: the final field is omitted.
fn walk<'v>(slots: &'v [Slot], path: &[PathStep]) -> Option<Option<&'v Value>> {
    let (first, rest) = path.split_first()?;
    let idx = match first {
        PathStep::Field(i) => *i,
        PathStep::Alt(_) => return None,
    };
    let mut cur = match slots.get(idx)? {
        Slot::Present(v) => Some(v),
        Slot::Omit => None,
        Slot::Unbound => return None,
    };
    for step in rest {
        let v = cur?;
        cur = match step {
            PathStep::Field(k) => match v.as_record()?.get(*k)? {
                Slot::Present(x) => Some(x),
                Slot::Omit => None,
                Slot::Unbound => return None,
            },
            PathStep::Alt(name) => match v.as_union() {
                Some((alt, inner)) if alt == name => Some(inner),
                _ => return None,
            },
        };
    }
    Some(cur)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagInfo {
    pub field: usize,
    /// Alternatives are ORed; empty = OTHERWISE.
    pub checks: Vec<Check>,
}

impl TagInfo {
    pub fn is_otherwise(&self) -> bool {
        self.checks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossTag {
    /// Index of the selected union alternative.
    pub alternative: usize,
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chosen {
    pub alternative: Option<usize>,
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtGroup {
    pub mode: ExtBit,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub optional: bool,
    /// The field's type is a `record of`.
    pub repeatable: bool,
    /// Field spec with `fieldlength` applied.
    pub spec: TypeSpec,
    pub fixed_bits: Option<usize>,
    pub lengthto: Vec<usize>,
    pub unit: LengthUnit,
    pub lengthto_offset: i64,
    pub lengthindex: Option<usize>,
    /// Length sources that bound this field.
    pub lengthof: Vec<usize>,
    pub pointerto: Option<usize>,
    /// Pointer source that locates this field.
    pub pointerof: Option<usize>,
    pub ptrunit: usize,
    pub ptroffset: i64,
    /// For a pointer source: the field whose start the offset is relative to.
    pub ptrbase: Option<usize>,
    pub is_ptrbase: bool,
    pub ext_group: Option<usize>,
    /// Index into [`Layout::tags`].
    pub tag: Option<usize>,
    pub crosstag: Vec<CrossTag>,
    pub presence: Vec<Check>,
    pub chosen: Vec<Chosen>,
    pub delayed: bool,
    /// Delayed fields decoded right after this one, in order.
    pub dependents: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub name: String,
    pub kind: StructKind,
    pub fields: Vec<FieldLayout>,
    pub tags: Vec<TagInfo>,
    pub ext_groups: Vec<ExtGroup>,
    pub presence: Vec<Check>,
    pub bit_order: Option<BitOrder>,
    pub prepadding: u32,
    pub padding: u32,
    pub extension_bit: ExtBit,
    pub has_lengthto: bool,
    pub has_pointer: bool,
    pub has_crosstag: bool,
}

impl Layout {
    pub fn tag_of(&self, field: usize) -> Option<&TagInfo> {
        self.fields[field].tag.map(|t| &self.tags[t])
    }

    pub fn mandatory_count(&self) -> usize {
        self.fields.iter().filter(|f| !f.optional).count()
    }

    pub fn is_set(&self) -> bool {
        self.kind == StructKind::Set
    }
}

struct Analyzer<'a> {
    schema: &'a ResolvedSchema,
    def: &'a StructDef,
}

/// Analyze one record/set definition.
pub fn analyze(schema: &ResolvedSchema, def: &StructDef) -> Result<Layout, SchemaError> {
    let a = Analyzer { schema, def };
    a.run()
}

impl<'a> Analyzer<'a> {
    fn field_error(&self, field: &str, reason: impl Into<String>) -> SchemaError {
        SchemaError::Field {
            type_name: self.def.name.clone(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn index_of(&self, name: &str) -> Result<usize, SchemaError> {
        self.def
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| SchemaError::UnknownField {
                type_name: self.def.name.clone(),
                field: name.to_string(),
            })
    }

    fn run(&self) -> Result<Layout, SchemaError> {
        let def = self.def;
        let mut fields = Vec::with_capacity(def.fields.len());
        for f in &def.fields {
            let spec = self.effective_spec(f)?;
            let fixed_bits = self.schema.fixed_bits(&spec);
            let repeatable = matches!(self.schema.spec_of(&spec), TypeSpec::RecordOf(_));
            fields.push(FieldLayout {
                name: f.name.clone(),
                optional: f.optional,
                repeatable,
                spec,
                fixed_bits,
                lengthto: Vec::new(),
                unit: f.raw.unit,
                lengthto_offset: f.raw.lengthto_offset,
                lengthindex: None,
                lengthof: Vec::new(),
                pointerto: None,
                pointerof: None,
                ptrunit: f.raw.ptrunit.unwrap_or(8) as usize,
                ptroffset: f.raw.ptroffset,
                ptrbase: None,
                is_ptrbase: false,
                ext_group: None,
                tag: None,
                crosstag: Vec::new(),
                presence: Vec::new(),
                chosen: Vec::new(),
                delayed: false,
                dependents: Vec::new(),
            });
        }

        for (i, f) in def.fields.iter().enumerate() {
            self.length_facts(i, f, &mut fields)?;
            self.pointer_facts(i, f, &mut fields)?;
            fields[i].presence = self.checks(&f.raw.presence)?;
            for rule in &f.raw.crosstag {
                let alternative = self.alternative_index(f, &fields[i].spec, &rule.alternative)?;
                let checks = self.checks(&rule.checks)?;
                fields[i].crosstag.push(CrossTag { alternative, checks });
            }
            for rule in &f.json.chosen {
                let alternative = match &rule.alternative {
                    Some(alt) => Some(self.alternative_index(f, &fields[i].spec, alt)?),
                    None => None,
                };
                let checks = self.checks(&rule.checks)?;
                fields[i].chosen.push(Chosen { alternative, checks });
            }
        }

        let mut tags = Vec::new();
        for rule in &def.raw.taglist {
            let idx = self.index_of(&rule.field)?;
            if fields[idx].tag.is_some() {
                return Err(self.field_error(&rule.field, "more than one tag rule"));
            }
            fields[idx].tag = Some(tags.len());
            tags.push(TagInfo {
                field: idx,
                checks: self.checks(&rule.checks)?,
            });
        }

        let mut ext_groups: Vec<ExtGroup> = Vec::new();
        for g in &def.raw.ext_bit_groups {
            let from = self.index_of(&g.from)?;
            let to = self.index_of(&g.to)?;
            if from > to {
                return Err(self.field_error(&g.from, format!("extension-bit group ends before it starts at '{}'", g.to)));
            }
            if let Some(i) = (from..=to).find(|&i| fields[i].ext_group.is_some()) {
                return Err(self.field_error(&fields[i].name, "field is in two extension-bit groups"));
            }
            for f in &mut fields[from..=to] {
                f.ext_group = Some(ext_groups.len());
            }
            ext_groups.push(ExtGroup { mode: g.mode, from, to });
        }

        if def.kind == StructKind::Record {
            self.schedule(&mut fields)?;
            self.check_decode_order(&fields, &tags)?;
        }

        let layout = Layout {
            name: def.name.clone(),
            kind: def.kind,
            has_lengthto: fields.iter().any(|f| !f.lengthto.is_empty()),
            has_pointer: fields.iter().any(|f| f.pointerto.is_some()),
            has_crosstag: fields.iter().any(|f| !f.crosstag.is_empty()),
            fields,
            tags,
            ext_groups,
            presence: self.checks(&def.raw.presence)?,
            bit_order: def.raw.bit_order,
            prepadding: def.raw.prepadding,
            padding: def.raw.padding,
            extension_bit: def.raw.extension_bit,
        };
        debug!(
            type_name = %layout.name,
            tags = layout.tags.len(),
            ext_groups = layout.ext_groups.len(),
            lengthto = layout.has_lengthto,
            pointer = layout.has_pointer,
            crosstag = layout.has_crosstag,
            "layout analyzed"
        );
        Ok(layout)
    }

    fn effective_spec(&self, f: &FieldDef) -> Result<TypeSpec, SchemaError> {
        let n = match f.raw.fieldlength {
            Some(n) => n,
            None => return Ok(f.spec.clone()),
        };
        let octets = |n: u32| -> Result<usize, SchemaError> {
            if n % 8 != 0 {
                return Err(self.field_error(&f.name, format!("fieldlength({}) is not a whole number of octets", n)));
            }
            Ok(n as usize / 8)
        };
        Ok(match self.schema.spec_of(&f.spec) {
            TypeSpec::Integer { signed, endianness, .. } => TypeSpec::Integer {
                bits: n,
                signed: *signed,
                endianness: *endianness,
            },
            TypeSpec::Boolean { .. } => TypeSpec::Boolean { bits: n },
            TypeSpec::Enumerated { items, .. } => TypeSpec::Enumerated {
                bits: n,
                items: items.clone(),
            },
            TypeSpec::OctetString { .. } => TypeSpec::OctetString { octets: Some(octets(n)?) },
            TypeSpec::CharString { .. } => TypeSpec::CharString { chars: Some(octets(n)?) },
            TypeSpec::BitString { .. } => TypeSpec::BitString { bits: Some(n as usize) },
            _ => return Err(self.field_error(&f.name, "fieldlength only applies to scalar types")),
        })
    }

    /// A length source is an integer field, or an integer sub-field of a record with
    /// `lengthindex`. Union-typed length fields are not supported. In a record every target
    /// follows its source.
    fn length_facts(&self, i: usize, f: &FieldDef, fields: &mut [FieldLayout]) -> Result<(), SchemaError> {
        if f.raw.lengthto.is_empty() {
            if f.raw.lengthindex.is_some() {
                return Err(self.field_error(&f.name, "lengthindex without lengthto"));
            }
            return Ok(());
        }
        match &f.raw.lengthindex {
            Some(sub) => {
                let inner = match self.schema.spec_of(&f.spec) {
                    TypeSpec::Struct(inner) => inner,
                    _ => return Err(self.field_error(&f.name, "lengthindex needs a record field")),
                };
                let k = inner
                    .fields
                    .iter()
                    .position(|g| &g.name == sub)
                    .ok_or_else(|| SchemaError::UnknownField {
                        type_name: inner.name.clone(),
                        field: sub.clone(),
                    })?;
                if !matches!(self.schema.spec_of(&inner.fields[k].spec), TypeSpec::Integer { .. }) {
                    return Err(self.field_error(&f.name, format!("length sub-field '{}' is not an integer", sub)));
                }
                fields[i].lengthindex = Some(k);
            }
            None => {
                if !matches!(self.schema.spec_of(&fields[i].spec), TypeSpec::Integer { .. }) {
                    return Err(self.field_error(&f.name, "length field must be an integer"));
                }
            }
        }
        for target in &f.raw.lengthto {
            let t = self.index_of(target)?;
            if t == i {
                return Err(SchemaError::SelfReference {
                    type_name: self.def.name.clone(),
                    field: f.name.clone(),
                    attribute: "lengthto",
                });
            }
            if t < i && self.def.kind == StructKind::Record {
                return Err(self.field_error(&f.name, format!("length target '{}' precedes the length field", target)));
            }
            if f.raw.unit == LengthUnit::Elements && !fields[t].repeatable {
                return Err(self.field_error(&f.name, format!("unit(elements) needs a record of target, '{}' is not", target)));
            }
            fields[i].lengthto.push(t);
            fields[t].lengthof.push(i);
        }
        if let LengthUnit::Bits(0) = f.raw.unit {
            return Err(self.field_error(&f.name, "unit must be positive"));
        }
        Ok(())
    }

    fn pointer_facts(&self, i: usize, f: &FieldDef, fields: &mut [FieldLayout]) -> Result<(), SchemaError> {
        let target = match &f.raw.pointerto {
            Some(t) => t,
            None => return Ok(()),
        };
        if self.def.kind == StructKind::Set {
            return Err(self.field_error(&f.name, "pointerto is only supported in records"));
        }
        let t = self.index_of(target)?;
        if t == i {
            return Err(SchemaError::SelfReference {
                type_name: self.def.name.clone(),
                field: f.name.clone(),
                attribute: "pointerto",
            });
        }
        if t < i {
            return Err(self.field_error(&f.name, format!("pointer target '{}' precedes the pointer", target)));
        }
        if fields[t].pointerof.is_some() {
            return Err(self.field_error(target, "field is the target of two pointers"));
        }
        let base = match &f.raw.pointerbase {
            Some(b) => self.index_of(b)?,
            None => i,
        };
        if base >= t {
            return Err(self.field_error(&f.name, "pointer base must precede the target"));
        }
        if !matches!(self.schema.spec_of(&fields[i].spec), TypeSpec::Integer { .. }) {
            return Err(self.field_error(&f.name, "pointer field must be an integer"));
        }
        if fields[i].ptrunit == 0 {
            return Err(self.field_error(&f.name, "ptrunit must be positive"));
        }
        fields[i].pointerto = Some(t);
        fields[i].ptrbase = Some(base);
        fields[t].pointerof = Some(i);
        fields[base].is_ptrbase = true;
        Ok(())
    }

    fn alternative_index(&self, f: &FieldDef, spec: &TypeSpec, alt: &str) -> Result<usize, SchemaError> {
        match self.schema.spec_of(spec) {
            TypeSpec::Union(u) => u
                .alternatives
                .iter()
                .position(|a| a.name == alt)
                .ok_or_else(|| self.field_error(&f.name, format!("union has no alternative '{}'", alt))),
            _ => Err(self.field_error(&f.name, "crosstag/chosen needs a union field")),
        }
    }

    fn checks(&self, checks: &[FieldCheck]) -> Result<Vec<Check>, SchemaError> {
        checks.iter().map(|c| self.check(c)).collect()
    }

    fn check(&self, c: &FieldCheck) -> Result<Check, SchemaError> {
        let first = c
            .path
            .first()
            .ok_or_else(|| self.field_error("", "empty check path"))?;
        let i = self.index_of(first)?;
        let mut path = vec![PathStep::Field(i)];
        let mut spec = self.effective_spec(&self.def.fields[i])?;
        let mut optional = self.def.fields[i].optional;
        let mut offset = Some(0usize);
        for step in &c.path[1..] {
            match self.schema.spec_of(&spec) {
                TypeSpec::Struct(inner) => {
                    let j = inner
                        .fields
                        .iter()
                        .position(|g| &g.name == step)
                        .ok_or_else(|| SchemaError::UnknownField {
                            type_name: inner.name.clone(),
                            field: step.clone(),
                        })?;
                    if inner.kind == StructKind::Set || inner.raw.prepadding > 1 {
                        offset = None;
                    }
                    for g in &inner.fields[..j] {
                        let bits = if g.optional {
                            None
                        } else {
                            match g.raw.fieldlength {
                                Some(n) => Some(n as usize),
                                None => self.schema.fixed_bits(&g.spec),
                            }
                        };
                        offset = match (offset, bits) {
                            (Some(o), Some(b)) => Some(o + b),
                            _ => None,
                        };
                    }
                    optional = inner.fields[j].optional;
                    path.push(PathStep::Field(j));
                    spec = self.effective_spec(&inner.fields[j])?;
                }
                TypeSpec::Union(u) => {
                    let k = u
                        .alternatives
                        .iter()
                        .position(|a| &a.name == step)
                        .ok_or_else(|| self.field_error(first, format!("union has no alternative '{}'", step)))?;
                    optional = false;
                    path.push(PathStep::Alt(step.clone()));
                    spec = u.alternatives[k].spec.clone();
                }
                _ => return Err(self.field_error(first, format!("cannot select '{}' in a scalar", step))),
            }
        }
        let expected = match &c.value {
            CheckValue::Omit => {
                if !optional {
                    return Err(self.field_error(first, "omit check on a mandatory field"));
                }
                None
            }
            CheckValue::Literal(lit) => Some(self.literal_value(first, &spec, lit)?),
        };
        let fixed_offset = match self.schema.fixed_bits(&spec) {
            Some(_) => offset,
            None => None,
        };
        Ok(Check {
            path,
            expected,
            spec,
            fixed_offset,
        })
    }

    fn literal_value(&self, field: &str, spec: &TypeSpec, lit: &Literal) -> Result<Value, SchemaError> {
        let bad = || self.field_error(field, format!("literal {:?} does not match {}", lit, self.schema.display_name(spec)));
        Ok(match (self.schema.spec_of(spec), lit) {
            (TypeSpec::Integer { .. }, Literal::Int(x)) => Value::Integer(*x),
            (TypeSpec::Boolean { .. }, Literal::Bool(b)) => Value::Bool(*b),
            (TypeSpec::Enumerated { items, .. }, Literal::Ident(name)) => {
                if !items.iter().any(|(n, _)| n == name) {
                    return Err(bad());
                }
                Value::Enum(name.clone())
            }
            (TypeSpec::Enumerated { items, .. }, Literal::Int(x)) => {
                let (name, _) = items.iter().find(|(_, v)| v == x).ok_or_else(bad)?;
                Value::Enum(name.clone())
            }
            (TypeSpec::OctetString { .. }, Literal::Octets(b)) => Value::Octets(b.clone()),
            (TypeSpec::BitString { .. }, Literal::Bits(b)) => Value::Bits(b.clone()),
            (TypeSpec::CharString { .. }, Literal::Str(s)) => Value::Chars(s.clone()),
            _ => return Err(bad()),
        })
    }

    /// Presence and tag checks of a record field are evaluated when the field is decoded, so
    /// they may only read fields decoded before it (a tag may also read the field itself).
    fn check_decode_order(&self, fields: &[FieldLayout], tags: &[TagInfo]) -> Result<(), SchemaError> {
        let mut seq = vec![0usize; fields.len()];
        let mut k = 0;
        for (i, f) in fields.iter().enumerate() {
            if !f.delayed {
                seq[i] = k;
                k += 1;
            }
            for &j in &f.dependents {
                seq[j] = k;
                k += 1;
            }
        }
        for (i, f) in fields.iter().enumerate() {
            if let Some(c) = f.presence.iter().find(|c| seq[c.field()] >= seq[i]) {
                return Err(self.field_error(
                    &f.name,
                    format!("presence reads '{}', which is not decoded before this field", fields[c.field()].name),
                ));
            }
        }
        for tag in tags {
            let i = tag.field;
            if let Some(c) = tag.checks.iter().find(|c| c.field() != i && seq[c.field()] > seq[i]) {
                return Err(self.field_error(
                    &fields[i].name,
                    format!("tag reads '{}', which is not decoded before this field", fields[c.field()].name),
                ));
            }
        }
        Ok(())
    }

    /// Mark delayed fields and compute each field's dependents.
    fn schedule(&self, fields: &mut [FieldLayout]) -> Result<(), SchemaError> {
        let n = fields.len();
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, f) in fields.iter().enumerate() {
            for rule in &f.crosstag {
                for c in &rule.checks {
                    let d = c.field();
                    if d == i {
                        return Err(SchemaError::SelfReference {
                            type_name: self.def.name.clone(),
                            field: f.name.clone(),
                            attribute: "crosstag",
                        });
                    }
                    if !deps[i].contains(&d) {
                        deps[i].push(d);
                    }
                }
            }
        }
        // Walk declaration order: a field whose dependencies are not all decoded yet is
        // reserved; each decoded field releases the reserved fields that became ready.
        let mut delayed = vec![false; n];
        let mut decoded = vec![false; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n {
            if !deps[i].iter().all(|&d| decoded[d]) {
                delayed[i] = true;
                continue;
            }
            decoded[i] = true;
            loop {
                let ready = (0..i).find(|&j| delayed[j] && !decoded[j] && deps[j].iter().all(|&d| decoded[d]));
                match ready {
                    Some(j) => {
                        decoded[j] = true;
                        dependents[i].push(j);
                    }
                    None => break,
                }
            }
        }
        let stuck: Vec<String> = (0..n).filter(|&j| !decoded[j]).map(|j| fields[j].name.clone()).collect();
        if !stuck.is_empty() {
            return Err(SchemaError::DelayedDecodeCycle {
                type_name: self.def.name.clone(),
                fields: stuck,
            });
        }

        for (i, f) in fields.iter_mut().enumerate() {
            f.delayed = delayed[i];
            f.dependents = std::mem::take(&mut dependents[i]);
        }
        for f in fields.iter() {
            if !f.delayed {
                continue;
            }
            if f.fixed_bits.is_none() {
                return Err(self.field_error(&f.name, "delayed field needs a fixed bit length"));
            }
            if f.pointerof.is_some() {
                return Err(self.field_error(&f.name, "delayed field cannot be a pointer target"));
            }
        }
        for f in fields.iter().filter(|f| !f.dependents.is_empty()) {
            let names: Vec<&str> = f.dependents.iter().map(|&d| fields[d].name.as_str()).collect();
            debug!(type_name = %self.def.name, after = %f.name, dependents = ?names, "delayed decode scheduled");
        }
        Ok(())
    }
}
