//! Line-level diff: LCS alignment turned into opcodes, grouped into hunks.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Equal,
    Replace,
    Delete,
    Insert,
}

/// `a[a_range]` relates to `b[b_range]` as described by `tag`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opcode {
    pub tag: Tag,
    pub a: Range<usize>,
    pub b: Range<usize>,
}

impl Opcode {
    fn new(tag: Tag, a: Range<usize>, b: Range<usize>) -> Self {
        Self { tag, a, b }
    }
}

/// Opcodes covering both sequences end to end
pub fn opcodes<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Opcode> {
    let mut codes = Vec::new();
    let (mut i, mut j) = (0, 0);

    for (mi, mj) in matching_pairs(a, b) {
        push_gap(&mut codes, i..mi, j..mj);
        match codes.last_mut() {
            Some(last) if last.tag == Tag::Equal && last.a.end == mi && last.b.end == mj => {
                last.a.end = mi + 1;
                last.b.end = mj + 1;
            }
            _ => codes.push(Opcode::new(Tag::Equal, mi..mi + 1, mj..mj + 1)),
        }
        i = mi + 1;
        j = mj + 1;
    }
    push_gap(&mut codes, i..a.len(), j..b.len());
    codes
}

fn push_gap(codes: &mut Vec<Opcode>, a: Range<usize>, b: Range<usize>) {
    let tag = match (a.is_empty(), b.is_empty()) {
        (true, true) => return,
        (false, false) => Tag::Replace,
        (false, true) => Tag::Delete,
        (true, false) => Tag::Insert,
    };
    codes.push(Opcode::new(tag, a, b));
}

/// Index pairs of one longest common subsequence, in order
fn matching_pairs<T: PartialEq>(a: &[T], b: &[T]) -> Vec<(usize, usize)> {
    // Common prefix and suffix never need the table
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];
    let (n, m) = (a_mid.len(), b_mid.len());

    // lengths[i][j] = LCS length of a_mid[i..] and b_mid[j..]
    let width = m + 1;
    let mut lengths = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lengths[i * width + j] = if a_mid[i] == b_mid[j] {
                lengths[(i + 1) * width + j + 1] + 1
            } else {
                lengths[(i + 1) * width + j].max(lengths[i * width + j + 1])
            };
        }
    }

    let mut pairs: Vec<(usize, usize)> = (0..prefix).map(|k| (k, k)).collect();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a_mid[i] == b_mid[j] {
            pairs.push((prefix + i, prefix + j));
            i += 1;
            j += 1;
        } else if lengths[(i + 1) * width + j] >= lengths[i * width + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs.extend((0..suffix).map(|k| (a.len() - suffix + k, b.len() - suffix + k)));
    pairs
}

/// Split opcodes into hunks with at most `context` unchanged lines around
/// each change. Identical inputs produce no hunks.
pub fn grouped_opcodes(mut codes: Vec<Opcode>, context: usize) -> Vec<Vec<Opcode>> {
    if codes.is_empty() || codes.iter().all(|code| code.tag == Tag::Equal) {
        return Vec::new();
    }

    if let Some(first) = codes.first_mut().filter(|code| code.tag == Tag::Equal) {
        first.a.start = first.a.start.max(first.a.end.saturating_sub(context));
        first.b.start = first.b.start.max(first.b.end.saturating_sub(context));
    }
    if let Some(last) = codes.last_mut().filter(|code| code.tag == Tag::Equal) {
        last.a.end = last.a.end.min(last.a.start + context);
        last.b.end = last.b.end.min(last.b.start + context);
    }

    let mut groups = Vec::new();
    let mut group = Vec::new();
    for mut code in codes {
        if code.tag == Tag::Equal && code.a.len() > context * 2 {
            group.push(Opcode::new(
                Tag::Equal,
                code.a.start..(code.a.start + context),
                code.b.start..(code.b.start + context),
            ));
            groups.push(std::mem::take(&mut group));
            code.a.start = code.a.end - context;
            code.b.start = code.b.end - context;
        }
        group.push(code);
    }
    if !(group.is_empty() || (group.len() == 1 && group[0].tag == Tag::Equal)) {
        groups.push(group);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<&str> {
        text.split('\n').collect()
    }

    #[test]
    fn identical_sequences_are_one_equal_block() {
        let a = lines("a\nb\nc");
        assert_eq!(opcodes(&a, &a), vec![Opcode::new(Tag::Equal, 0..3, 0..3)]);
        assert!(grouped_opcodes(opcodes(&a, &a), 3).is_empty());
    }

    #[test]
    fn replacement_insertion_and_deletion() {
        let a = lines("keep\nold\ngone\ntail");
        let b = lines("keep\nnew\ntail\nadded");
        assert_eq!(
            opcodes(&a, &b),
            vec![
                Opcode::new(Tag::Equal, 0..1, 0..1),
                Opcode::new(Tag::Replace, 1..3, 1..2),
                Opcode::new(Tag::Equal, 3..4, 2..3),
                Opcode::new(Tag::Insert, 4..4, 3..4),
            ]
        );
    }

    #[test]
    fn distant_changes_split_into_separate_hunks() {
        let a: Vec<String> = (0..20).map(|n| format!("line {n}")).collect();
        let mut b = a.clone();
        b[1] = "changed 1".to_string();
        b[18] = "changed 18".to_string();

        let groups = grouped_opcodes(opcodes(&a, &b), 3);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].first().unwrap().a, 0..1);
        assert_eq!(groups[0].last().unwrap().a, 2..5);
        assert_eq!(groups[1].first().unwrap().a, 15..18);
        assert_eq!(groups[1].last().unwrap().a, 19..20);
    }

    #[test]
    fn close_changes_share_a_hunk() {
        let a: Vec<String> = (0..10).map(|n| format!("line {n}")).collect();
        let mut b = a.clone();
        b[2] = "x".to_string();
        b[6] = "y".to_string();
        assert_eq!(grouped_opcodes(opcodes(&a, &b), 3).len(), 1);
    }
}
