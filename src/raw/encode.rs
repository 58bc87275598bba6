//! RAW encoder: value → encode tree → bits.

use super::tree::{apply_ext_spans, integer_chunks, Body, Calc, Chunk, ExtMark, IntFormat, Node};
use crate::ast::{ExtBit, ResolvedSchema, StructDef, TypeSpec};
use crate::bits::{BitOrder, BitWriter};
use crate::error::{CodecError, ErrorContext, ErrorKind};
use crate::layout::{any_holds, Check, FieldLayout, Layout, PathStep};
use crate::value::{Slot, Value};

pub(crate) struct RawEncoder<'a> {
    schema: &'a ResolvedSchema,
    ctx: &'a ErrorContext,
}

impl<'a> RawEncoder<'a> {
    pub fn new(schema: &'a ResolvedSchema, ctx: &'a ErrorContext) -> Self {
        RawEncoder { schema, ctx }
    }

    /// Encode a complete top-level value; the result is padded to whole octets.
    pub fn encode(&self, spec: &TypeSpec, value: &Value, order: BitOrder) -> Result<Vec<u8>, CodecError> {
        let mut root = self.node(spec, value, order)?;
        let end = root.place(0);
        root.resolve(self.ctx)?;
        let mut w = BitWriter::new();
        root.flush(&mut w);
        let mut spans = Vec::new();
        root.ext_spans(&mut spans, &mut Vec::new());
        apply_ext_spans(&spans, &mut w);
        w.set_pos(end);
        w.pad_to(8);
        Ok(w.into_bytes())
    }

    fn mismatch(&self, spec: &TypeSpec, value: &Value) -> CodecError {
        self.ctx.error(
            ErrorKind::InvalidValue,
            format!("Value {} does not match type {}.", crate::dump::format_value(value), self.schema.display_name(spec)),
        )
    }

    fn int_format(&self, spec: &TypeSpec, order: BitOrder) -> Option<IntFormat> {
        match self.schema.spec_of(spec) {
            TypeSpec::Integer { bits, signed, endianness } => Some(IntFormat {
                bits: *bits,
                signed: *signed,
                endianness: *endianness,
                order,
            }),
            _ => None,
        }
    }

    fn node(&self, spec: &TypeSpec, value: &Value, order: BitOrder) -> Result<Node, CodecError> {
        let bad = || self.mismatch(spec, value);
        match self.schema.spec_of(spec) {
            TypeSpec::Integer { .. } => {
                let x = value.as_i64().ok_or_else(bad)?;
                let format = self.int_format(spec, order).ok_or_else(bad)?;
                let chunks = integer_chunks(x, &format).map_err(|m| self.ctx.error(ErrorKind::InvalidValue, m))?;
                Ok(Node::leaf(chunks))
            }
            TypeSpec::Boolean { bits } => {
                let b = value.as_bool().ok_or_else(bad)?;
                Ok(Node::leaf(vec![Chunk {
                    value: b as u64,
                    bits: *bits,
                    order,
                }]))
            }
            TypeSpec::Enumerated { bits, items } => {
                let name = value.as_enum().ok_or_else(bad)?;
                let (_, code) = items.iter().find(|(n, _)| n == name).ok_or_else(|| {
                    self.ctx.error(
                        ErrorKind::InvalidValue,
                        format!("Unknown enumerated value '{}' for type {}.", name, self.schema.display_name(spec)),
                    )
                })?;
                let format = IntFormat {
                    bits: *bits,
                    signed: items.iter().any(|(_, v)| *v < 0),
                    endianness: None,
                    order,
                };
                let chunks = integer_chunks(*code, &format).map_err(|m| self.ctx.error(ErrorKind::InvalidValue, m))?;
                Ok(Node::leaf(chunks))
            }
            TypeSpec::OctetString { octets } => {
                let bytes = value.as_octets().ok_or_else(bad)?;
                self.check_fixed_len(*octets, bytes.len(), "octets")?;
                Ok(Node::leaf(octet_chunks(bytes, order)))
            }
            TypeSpec::CharString { chars } => {
                let s = value.as_str().ok_or_else(bad)?;
                self.check_fixed_len(*chars, s.len(), "characters")?;
                Ok(Node::leaf(octet_chunks(s.as_bytes(), order)))
            }
            TypeSpec::BitString { bits } => {
                let v = match value {
                    Value::Bits(v) => v,
                    _ => return Err(bad()),
                };
                self.check_fixed_len(*bits, v.len(), "bits")?;
                Ok(Node::leaf(
                    v.iter()
                        .map(|b| Chunk {
                            value: *b as u64,
                            bits: 1,
                            order,
                        })
                        .collect(),
                ))
            }
            TypeSpec::Union(u) => {
                let (alt, inner) = value.as_union().ok_or_else(bad)?;
                let a = u.alternatives.iter().find(|a| a.name == alt).ok_or_else(|| {
                    self.ctx.error(
                        ErrorKind::InvalidValue,
                        format!("Union {} has no alternative '{}'.", self.schema.display_name(spec), alt),
                    )
                })?;
                self.node(&a.spec, inner, order)
            }
            TypeSpec::RecordOf(r) => {
                let items = value.as_list().ok_or_else(bad)?;
                let mut children = Vec::with_capacity(items.len());
                for (k, item) in items.iter().enumerate() {
                    let _g = self.ctx.enter(format!("Element {}: ", k));
                    children.push(Some(self.node(&r.element, item, order)?));
                }
                Ok(Node::children(children))
            }
            TypeSpec::Struct(def) => self.struct_node(def, value, order),
            TypeSpec::Named(n) => Err(self.ctx.error(ErrorKind::UnknownType, format!("Unknown type {}.", n))),
        }
    }

    fn check_fixed_len(&self, fixed: Option<usize>, actual: usize, what: &str) -> Result<(), CodecError> {
        match fixed {
            Some(n) if n != actual => Err(self.ctx.error(
                ErrorKind::InvalidValue,
                format!("Value has {} {}, the field length is {}.", actual, what, n),
            )),
            _ => Ok(()),
        }
    }

    fn struct_node(&self, def: &StructDef, value: &Value, inherited: BitOrder) -> Result<Node, CodecError> {
        let layout = self
            .schema
            .layout(&def.name)
            .ok_or_else(|| self.ctx.error(ErrorKind::UnknownType, format!("Unknown type {}.", def.name)))?;
        let slots = match value {
            Value::Record(s) => s,
            _ => return Err(self.mismatch(&TypeSpec::Named(def.name.clone()), value)),
        };
        if !value.is_bound() {
            return Err(self.ctx.error(ErrorKind::Unbound, format!("Encoding an unbound value of type {}.", def.name)));
        }
        if slots.len() != layout.fields.len() {
            return Err(self.ctx.error(
                ErrorKind::InvalidValue,
                format!("Value of type {} has {} fields, expected {}.", def.name, slots.len(), layout.fields.len()),
            ));
        }
        let order = layout.bit_order.unwrap_or(inherited);

        let mut children: Vec<Option<Node>> = Vec::with_capacity(slots.len());
        for (i, f) in layout.fields.iter().enumerate() {
            let _g = self.ctx.enter(format!("Field '{}': ", f.name));
            let v = match &slots[i] {
                Slot::Unbound => {
                    return Err(self.ctx.error(ErrorKind::Unbound, format!("Encoding an unbound value of type {}.", def.name)))
                }
                Slot::Omit if f.optional => {
                    children.push(None);
                    continue;
                }
                Slot::Omit => return Err(self.ctx.error(ErrorKind::InvalidValue, "Omitting a mandatory field.")),
                Slot::Present(v) => v,
            };
            let node = if !f.lengthto.is_empty() && f.lengthindex.is_none() {
                let format = self.int_format(&f.spec, order).ok_or_else(|| self.mismatch(&f.spec, v))?;
                Node::pending(
                    format.bits,
                    Calc::Length {
                        targets: f.lengthto.clone(),
                        unit: f.unit,
                        offset: f.lengthto_offset,
                        format,
                        outer: false,
                    },
                )
            } else if let Some(t) = f.pointerto {
                let format = self.int_format(&f.spec, order).ok_or_else(|| self.mismatch(&f.spec, v))?;
                if slots[t].is_present() {
                    Node::pending(
                        format.bits,
                        Calc::Pointer {
                            target: t,
                            base: f.ptrbase.unwrap_or(i),
                            unit: f.ptrunit,
                            offset: f.ptroffset,
                            format,
                        },
                    )
                } else {
                    let chunks = integer_chunks(0, &format).map_err(|m| self.ctx.error(ErrorKind::InvalidValue, m))?;
                    Node::leaf(chunks)
                }
            } else {
                let mut node = self.node(&f.spec, v, order)?;
                if let Some(k) = f.lengthindex {
                    self.length_subfield(&mut node, f, k, order)?;
                }
                node
            };
            children.push(Some(node));
        }

        self.force_predicates(layout, slots, &mut children, order)?;
        mark_ext_groups(layout, &mut children, order);

        let mut node = Node::children(children);
        node.prepadding = layout.prepadding;
        node.padding = layout.padding;
        if layout.extension_bit != ExtBit::No {
            node.ext = Some(ExtMark {
                mode: layout.extension_bit,
                order,
                first: true,
                last: true,
            });
        }
        Ok(node)
    }

    /// Move the length role of a `lengthindex` source onto its integer sub-field.
    fn length_subfield(&self, node: &mut Node, f: &FieldLayout, k: usize, order: BitOrder) -> Result<(), CodecError> {
        let inner = match self.schema.spec_of(&f.spec) {
            TypeSpec::Struct(def) => self.schema.layout(&def.name),
            _ => None,
        };
        let inner = inner.ok_or_else(|| self.ctx.error(ErrorKind::InvalidValue, "Length field is not a record."))?;
        let sub_order = inner.bit_order.unwrap_or(order);
        let format = self
            .int_format(&inner.fields[k].spec, sub_order)
            .ok_or_else(|| self.ctx.error(ErrorKind::InvalidValue, "Length sub-field is not an integer."))?;
        if let Body::Children(c) = &mut node.body {
            if let Some(Some(sub)) = c.get_mut(k) {
                let pending = Node::pending(
                    format.bits,
                    Calc::Length {
                        targets: f.lengthto.clone(),
                        unit: f.unit,
                        offset: f.lengthto_offset,
                        format,
                        outer: true,
                    },
                );
                *sub = pending;
            }
        }
        Ok(())
    }

    /// Make tag, presence and crosstag predicates hold by encoding their values into the
    /// referenced fields.
    fn force_predicates(
        &self,
        layout: &Layout,
        slots: &[Slot],
        children: &mut [Option<Node>],
        order: BitOrder,
    ) -> Result<(), CodecError> {
        for (i, f) in layout.fields.iter().enumerate() {
            if children[i].is_none() {
                continue;
            }
            let _g = self.ctx.enter(format!("Field '{}': ", f.name));
            if let Some(tag) = layout.tag_of(i) {
                if !tag.is_otherwise() && !any_holds(slots, &tag.checks) {
                    self.force(&tag.checks[0], children, order)?;
                }
            }
            if !f.presence.is_empty() && !any_holds(slots, &f.presence) {
                self.force(&f.presence[0], children, order)?;
            }
            if !f.crosstag.is_empty() {
                let selected = slots[i].value().and_then(Value::as_union).map(|(alt, _)| alt);
                let alt_index = selected.and_then(|name| match self.schema.spec_of(&f.spec) {
                    TypeSpec::Union(u) => u.alternatives.iter().position(|a| a.name == name),
                    _ => None,
                });
                let rule = alt_index.and_then(|k| f.crosstag.iter().find(|r| r.alternative == k));
                if let Some(rule) = rule {
                    if !rule.checks.is_empty() && !any_holds(slots, &rule.checks) {
                        self.force(&rule.checks[0], children, order)?;
                    }
                }
            }
        }
        if !layout.presence.is_empty() && !any_holds(slots, &layout.presence) {
            self.force(&layout.presence[0], children, order)?;
        }
        Ok(())
    }

    fn force(&self, check: &Check, children: &mut [Option<Node>], order: BitOrder) -> Result<(), CodecError> {
        let idx = check.field();
        let expected = match &check.expected {
            Some(v) => v,
            None => {
                children[idx] = None;
                return Ok(());
            }
        };
        let replacement = self.node(&check.spec, expected, order)?;
        let node = children[idx]
            .as_mut()
            .and_then(|n| node_at(n, &check.path[1..]))
            .ok_or_else(|| self.ctx.error(ErrorKind::OmittedTag, "Encoding a tagged, but omitted value."))?;
        node.body = replacement.body;
        Ok(())
    }
}

/// Node reached by `path`; a union node is its selected alternative's node.
fn node_at<'n>(node: &'n mut Node, path: &[PathStep]) -> Option<&'n mut Node> {
    match path.split_first() {
        None => Some(node),
        Some((PathStep::Alt(_), rest)) => node_at(node, rest),
        Some((PathStep::Field(k), rest)) => match &mut node.body {
            Body::Children(c) => node_at(c.get_mut(*k)?.as_mut()?, rest),
            _ => None,
        },
    }
}

fn octet_chunks(bytes: &[u8], order: BitOrder) -> Vec<Chunk> {
    bytes
        .iter()
        .map(|b| Chunk {
            value: *b as u64,
            bits: 8,
            order,
        })
        .collect()
}

fn mark_ext_groups(layout: &Layout, children: &mut [Option<Node>], order: BitOrder) {
    for g in &layout.ext_groups {
        if g.mode == ExtBit::No {
            continue;
        }
        let present: Vec<usize> = (g.from..=g.to).filter(|&i| children[i].is_some()).collect();
        let (first, last) = match (present.first(), present.last()) {
            (Some(&a), Some(&b)) => (a, b),
            _ => continue,
        };
        for (idx, is_first, is_last) in [(first, true, first == last), (last, first == last, true)] {
            if let Some(node) = children[idx].as_mut() {
                if node.ext.is_none() {
                    node.ext = Some(ExtMark {
                        mode: g.mode,
                        order,
                        first: is_first,
                        last: is_last,
                    });
                }
            }
        }
    }
}
