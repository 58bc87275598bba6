//! Encode tree: one node per field, placed first, then resolved, then flushed.
//!
//! Length and pointer fields are `Pending` until [`Node::resolve`] runs: their width is
//! known up front, their value only once every sibling has a final position.

use crate::ast::{Endianness, ExtBit, LengthUnit};
use crate::bits::{padding_for, BitOrder, BitWriter};
use crate::error::{CodecError, ErrorContext, ErrorKind};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub value: u64,
    pub bits: u32,
    pub order: BitOrder,
}

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Leaf(Vec<Chunk>),
    /// Synthesized during resolution; only the width is known.
    Pending(u32),
    Children(Vec<Option<Node>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IntFormat {
    pub bits: u32,
    pub signed: bool,
    pub endianness: Option<Endianness>,
    pub order: BitOrder,
}

#[derive(Debug, Clone)]
pub(crate) enum Calc {
    None,
    Length {
        targets: Vec<usize>,
        unit: LengthUnit,
        offset: i64,
        format: IntFormat,
        /// Sits on the length sub-field of a `lengthindex` source: targets are siblings of
        /// the enclosing field, not of this node.
        outer: bool,
    },
    Pointer {
        target: usize,
        base: usize,
        unit: usize,
        offset: i64,
        format: IntFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExtMark {
    pub mode: ExtBit,
    pub order: BitOrder,
    pub first: bool,
    pub last: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub body: Body,
    pub calc: Calc,
    pub prepadding: u32,
    pub padding: u32,
    pub ext: Option<ExtMark>,
    /// Absolute bit position, before prepadding.
    pub start: usize,
    /// Bits including prepadding and padding.
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExtSpan {
    pub start: usize,
    pub end: usize,
    pub mode: ExtBit,
    pub order: BitOrder,
}

impl Node {
    pub fn leaf(chunks: Vec<Chunk>) -> Self {
        Node::with_body(Body::Leaf(chunks))
    }

    pub fn pending(bits: u32, calc: Calc) -> Self {
        let mut n = Node::with_body(Body::Pending(bits));
        n.calc = calc;
        n
    }

    pub fn children(children: Vec<Option<Node>>) -> Self {
        Node::with_body(Body::Children(children))
    }

    fn with_body(body: Body) -> Self {
        Node {
            body,
            calc: Calc::None,
            prepadding: 0,
            padding: 0,
            ext: None,
            start: 0,
            len: 0,
        }
    }

    /// Assign absolute positions to this subtree starting at `pos`. Returns the end position.
    pub fn place(&mut self, pos: usize) -> usize {
        self.start = pos;
        let mut cur = pos + padding_for(pos, self.prepadding);
        match &mut self.body {
            Body::Leaf(chunks) => cur += chunks.iter().map(|c| c.bits as usize).sum::<usize>(),
            Body::Pending(bits) => cur += *bits as usize,
            Body::Children(children) => {
                for child in children.iter_mut().flatten() {
                    cur = child.place(cur);
                }
            }
        }
        cur += padding_for(cur, self.padding);
        self.len = cur - pos;
        cur
    }

    /// Fill in every pending length/pointer value. Requires [`Node::place`] first.
    pub fn resolve(&mut self, ctx: &ErrorContext) -> Result<(), CodecError> {
        let children = match &mut self.body {
            Body::Children(c) => c,
            _ => return Ok(()),
        };
        let mut patches: Vec<(usize, Option<usize>, Vec<Chunk>)> = Vec::new();
        for (i, child) in children.iter().enumerate() {
            let child = match child {
                Some(c) => c,
                None => continue,
            };
            if !matches!(child.calc, Calc::None) {
                patches.push((i, None, compute(&child.calc, children, ctx)?));
            }
            if let Body::Children(sub) = &child.body {
                for (k, s) in sub.iter().enumerate() {
                    if let Some(s) = s {
                        if let Calc::Length { outer: true, .. } = s.calc {
                            patches.push((i, Some(k), compute(&s.calc, children, ctx)?));
                        }
                    }
                }
            }
        }
        for (i, sub, chunks) in patches {
            let node = match (children[i].as_mut(), sub) {
                (Some(n), None) => Some(n),
                (Some(n), Some(k)) => match &mut n.body {
                    Body::Children(c) => c[k].as_mut(),
                    _ => None,
                },
                (None, _) => None,
            };
            if let Some(node) = node {
                node.body = Body::Leaf(chunks);
                node.calc = Calc::None;
            }
        }
        for child in children.iter_mut().flatten() {
            child.resolve(ctx)?;
        }
        Ok(())
    }

    pub fn flush(&self, w: &mut BitWriter) {
        w.set_pos(self.start + padding_for(self.start, self.prepadding));
        match &self.body {
            Body::Leaf(chunks) => {
                for c in chunks {
                    w.write_bits(c.value, c.bits, c.order);
                }
            }
            Body::Pending(bits) => w.write_zeros(*bits as usize),
            Body::Children(children) => {
                for child in children.iter().flatten() {
                    child.flush(w);
                }
            }
        }
        w.set_pos(self.start + self.len);
    }

    /// Collect extension-bit spans from first/last marks, in stream order.
    pub fn ext_spans(&self, out: &mut Vec<ExtSpan>, open: &mut Vec<usize>) {
        if let Some(m) = self.ext {
            if m.first {
                open.push(self.start);
            }
        }
        if let Body::Children(children) = &self.body {
            for child in children.iter().flatten() {
                child.ext_spans(out, open);
            }
        }
        if let Some(m) = self.ext {
            if m.last {
                if let Some(start) = open.pop() {
                    out.push(ExtSpan {
                        start,
                        end: self.start + self.len,
                        mode: m.mode,
                        order: m.order,
                    });
                }
            }
        }
    }
}

fn compute(calc: &Calc, siblings: &[Option<Node>], ctx: &ErrorContext) -> Result<Vec<Chunk>, CodecError> {
    match calc {
        Calc::None => Ok(Vec::new()),
        Calc::Length {
            targets,
            unit,
            offset,
            format,
            ..
        } => {
            let mut total = 0usize;
            for node in targets.iter().filter_map(|&t| siblings.get(t).and_then(Option::as_ref)) {
                total += match unit {
                    LengthUnit::Bits(_) => node.len,
                    LengthUnit::Elements => match &node.body {
                        Body::Children(c) => c.iter().flatten().count(),
                        _ => 0,
                    },
                };
            }
            let units = match unit {
                LengthUnit::Bits(u) => total.div_ceil(*u as usize),
                LengthUnit::Elements => total,
            };
            let value = units as i64 + offset;
            trace!(bits = total, value, "length resolved");
            integer_chunks(value, format).map_err(|m| ctx.error(ErrorKind::LengthError, m))
        }
        Calc::Pointer {
            target,
            base,
            unit,
            offset,
            format,
        } => {
            let base_node = siblings
                .get(*base)
                .and_then(Option::as_ref)
                .ok_or_else(|| ctx.error(ErrorKind::InvalidValue, "Pointer base field is omitted."))?;
            let target_node = siblings
                .get(*target)
                .and_then(Option::as_ref)
                .ok_or_else(|| ctx.error(ErrorKind::InvalidValue, "Pointer target field is omitted."))?;
            let diff = target_node.start as i64 - base_node.start as i64 - offset;
            if diff < 0 || diff % *unit as i64 != 0 {
                return Err(ctx.error(
                    ErrorKind::LengthError,
                    format!("Pointer offset of {} bits is not a non-negative multiple of {} bits.", diff, unit),
                ));
            }
            let value = diff / *unit as i64;
            trace!(diff, value, "pointer resolved");
            integer_chunks(value, format).map_err(|m| ctx.error(ErrorKind::LengthError, m))
        }
    }
}

pub(crate) fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Encode an integer in `format`; the error names the violated range.
pub(crate) fn integer_chunks(value: i64, format: &IntFormat) -> Result<Vec<Chunk>, String> {
    let bits = format.bits;
    let fits = if format.signed {
        bits >= 64 || {
            let half = 1i64 << (bits - 1);
            value >= -half && value < half
        }
    } else {
        value >= 0 && (bits >= 64 || (value as u64) <= mask(bits))
    };
    if !fits {
        return Err(format!(
            "There are insufficient bits to encode {} in {} bits{}.",
            value,
            bits,
            if format.signed { " (signed)" } else { "" }
        ));
    }
    let raw = (value as u64) & mask(bits);
    Ok(match format.endianness {
        Some(e) if bits % 8 == 0 && bits > 8 => {
            let nb = (bits / 8) as usize;
            let mut buf = [0u8; 8];
            match e {
                Endianness::Big => BigEndian::write_uint(&mut buf[..nb], raw, nb),
                Endianness::Little => LittleEndian::write_uint(&mut buf[..nb], raw, nb),
            }
            buf[..nb]
                .iter()
                .map(|b| Chunk {
                    value: *b as u64,
                    bits: 8,
                    order: format.order,
                })
                .collect()
        }
        _ => vec![Chunk {
            value: raw,
            bits,
            order: format.order,
        }],
    })
}

/// Write extension bits: in every octet of a span the first bit is cleared, except in the
/// last octet where it is set (inverted for `reverse`).
pub(crate) fn apply_ext_spans(spans: &[ExtSpan], w: &mut BitWriter) {
    let end = w.pos();
    for span in spans {
        if span.end <= span.start || span.mode == ExtBit::No {
            continue;
        }
        let first = span.start / 8;
        let last = (span.end - 1) / 8;
        for octet in first..=last {
            let terminal = octet == last;
            let bit = match span.mode {
                ExtBit::Reverse => !terminal,
                _ => terminal,
            };
            w.set_octet_flag(octet, span.order, bit);
        }
    }
    w.set_pos(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8_leaf(v: u64) -> Node {
        Node::leaf(vec![Chunk {
            value: v,
            bits: 8,
            order: BitOrder::Msb,
        }])
    }

    #[test]
    fn length_resolved_after_placement() {
        let format = IntFormat {
            bits: 8,
            signed: false,
            endianness: None,
            order: BitOrder::Msb,
        };
        let len = Node::pending(
            8,
            Calc::Length {
                targets: vec![1, 2],
                unit: LengthUnit::Bits(8),
                offset: 1,
                format,
                outer: false,
            },
        );
        let mut root = Node::children(vec![Some(len), Some(u8_leaf(0xaa)), None, Some(u8_leaf(0xbb))]);
        assert_eq!(root.place(0), 24);
        root.resolve(&ErrorContext::new()).expect("resolve");
        let mut w = BitWriter::new();
        root.flush(&mut w);
        assert_eq!(w.into_bytes(), vec![0x02, 0xaa, 0xbb]);
    }

    #[test]
    fn integer_range_is_checked() {
        let format = IntFormat {
            bits: 4,
            signed: true,
            endianness: None,
            order: BitOrder::Lsb,
        };
        assert!(integer_chunks(7, &format).is_ok());
        assert!(integer_chunks(-8, &format).is_ok());
        assert!(integer_chunks(8, &format).is_err());
        let big = IntFormat {
            bits: 16,
            signed: false,
            endianness: Some(Endianness::Big),
            order: BitOrder::Lsb,
        };
        let chunks = integer_chunks(0x1234, &big).expect("fits");
        assert_eq!(chunks.iter().map(|c| c.value).collect::<Vec<_>>(), vec![0x12, 0x34]);
    }
}
