//! A hand-rolled Aho–Corasick automaton: trie construction with BFS failure links and
//! output-link chaining, plus a linear-time multi-pattern scan.

use std::collections::VecDeque;

const ROOT: u32 = 0;

#[derive(Debug, Clone, Default)]
struct Node {
    /// Child transitions keyed by byte value; dense enough over {A,C,G,T} that a
    /// small fixed-size map is preferable to a full 256-entry array per node.
    children: [u32; 256],
    has_child: [bool; 256],
    fail: u32,
    /// Pattern ids that end exactly at this node.
    matches: Vec<u32>,
    /// Output link: nearest proper suffix node that is itself a match (or has one
    /// further up its own output chain), letting `scan` report all matches ending
    /// at a position in O(matches) instead of walking the full fail chain each time.
    output_link: Option<u32>,
    depth: u32,
}

impl Node {
    fn new(depth: u32) -> Self {
        Node {
            children: [0; 256],
            has_child: [false; 256],
            fail: ROOT,
            matches: Vec::new(),
            output_link: None,
            depth,
        }
    }
}

/// A multi-pattern Aho–Corasick matcher over byte-string patterns with integer ids.
pub struct AhoCorasick {
    nodes: Vec<Node>,
    built: bool,
}

impl AhoCorasick {
    /// An empty automaton; patterns are added with `insert`, then `build` computes
    /// failure links before any `scan`.
    pub fn new() -> Self {
        AhoCorasick {
            nodes: vec![Node::new(0)],
            built: false,
        }
    }

    /// Construct directly from an ordered pattern list; ids are the index into `patterns`.
    pub fn from_patterns<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut ac = AhoCorasick::new();
        for (id, pattern) in patterns.into_iter().enumerate() {
            ac.insert(pattern.as_ref(), id as u32);
        }
        ac.build();
        ac
    }

    /// Insert one pattern with the given id. Must be called before `build`.
    pub fn insert(&mut self, pattern: &[u8], id: u32) {
        debug_assert!(!self.built, "cannot insert into a built automaton");
        let mut node = ROOT;
        for &byte in pattern {
            let idx = byte as usize;
            if !self.nodes[node as usize].has_child[idx] {
                let depth = self.nodes[node as usize].depth + 1;
                let new_idx = self.nodes.len() as u32;
                self.nodes.push(Node::new(depth));
                self.nodes[node as usize].children[idx] = new_idx;
                self.nodes[node as usize].has_child[idx] = true;
            }
            node = self.nodes[node as usize].children[idx];
        }
        self.nodes[node as usize].matches.push(id);
    }

    /// Breadth-first failure-link computation, plus output-link chaining so every
    /// match ending at a node is discoverable without walking its whole fail chain.
    pub fn build(&mut self) {
        let mut queue = VecDeque::new();

        for byte in 0..256usize {
            if self.nodes[ROOT as usize].has_child[byte] {
                let child = self.nodes[ROOT as usize].children[byte];
                self.nodes[child as usize].fail = ROOT;
                queue.push_back(child);
            }
        }

        while let Some(node) = queue.pop_front() {
            for byte in 0..256usize {
                if !self.nodes[node as usize].has_child[byte] {
                    continue;
                }
                let child = self.nodes[node as usize].children[byte];
                let mut fallback = self.nodes[node as usize].fail;
                loop {
                    if self.nodes[fallback as usize].has_child[byte] {
                        let candidate = self.nodes[fallback as usize].children[byte];
                        if candidate != child {
                            self.nodes[child as usize].fail = candidate;
                        } else {
                            self.nodes[child as usize].fail = ROOT;
                        }
                        break;
                    }
                    if fallback == ROOT {
                        self.nodes[child as usize].fail = ROOT;
                        break;
                    }
                    fallback = self.nodes[fallback as usize].fail;
                }
                let fail = self.nodes[child as usize].fail;
                self.nodes[child as usize].output_link = if !self.nodes[fail as usize].matches.is_empty() {
                    Some(fail)
                } else {
                    self.nodes[fail as usize].output_link
                };
                queue.push_back(child);
            }
        }
        self.built = true;
    }

    fn step(&self, mut node: u32, byte: u8) -> u32 {
        let idx = byte as usize;
        loop {
            if self.nodes[node as usize].has_child[idx] {
                return self.nodes[node as usize].children[idx];
            }
            if node == ROOT {
                return ROOT;
            }
            node = self.nodes[node as usize].fail;
        }
    }

    /// Scan `text`, invoking `emit(pattern_id, start_position)` for every occurrence
    /// (0-based start), including overlapping and nested matches. Runs in
    /// `O(|text| + sum of occurrence counts)` regardless of pattern-set size.
    pub fn scan<F: FnMut(u32, usize)>(&self, text: &[u8], mut emit: F) {
        debug_assert!(self.built, "automaton must be built before scanning");
        let mut node = ROOT;
        for (pos, &byte) in text.iter().enumerate() {
            node = self.step(node, byte);

            let n = &self.nodes[node as usize];
            for &id in &n.matches {
                emit(id, pos + 1 - n.depth as usize);
            }

            let mut link = n.output_link;
            while let Some(out) = link {
                let out_node = &self.nodes[out as usize];
                for &id in &out_node.matches {
                    emit(id, pos + 1 - out_node.depth as usize);
                }
                link = out_node.output_link;
            }
        }
    }
}

impl Default for AhoCorasick {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn collect(ac: &AhoCorasick, text: &[u8]) -> Vec<(u32, usize)> {
        let mut hits = Vec::new();
        ac.scan(text, |id, pos| hits.push((id, pos)));
        hits.sort();
        hits
    }

    #[test]
    fn single_pattern_non_overlapping() {
        let ac = AhoCorasick::from_patterns([b"ACGT".to_vec()]);
        assert_eq!(collect(&ac, b"ACGTACGT"), vec![(0, 0), (0, 4)]);
    }

    #[test]
    fn overlapping_matches_all_reported() {
        let ac = AhoCorasick::from_patterns([b"AAA".to_vec()]);
        assert_eq!(collect(&ac, b"AAAA"), vec![(0, 0), (0, 1)]);
    }

    #[test]
    fn nested_patterns_all_reported() {
        let ac = AhoCorasick::from_patterns([b"GG".to_vec(), b"GGG".to_vec()]);
        let hits: HashSet<_> = collect(&ac, b"GGG").into_iter().collect();
        assert!(hits.contains(&(0, 0)));
        assert!(hits.contains(&(0, 1)));
        assert!(hits.contains(&(1, 0)));
    }

    #[test]
    fn multi_pattern_set() {
        let ac = AhoCorasick::from_patterns([b"A".to_vec(), b"T".to_vec(), b"C".to_vec(), b"G".to_vec()]);
        assert_eq!(
            collect(&ac, b"ACGTN"),
            vec![(0, 0), (1, 3), (2, 1), (3, 2)]
        );
    }

    #[test]
    fn no_match_in_text() {
        let ac = AhoCorasick::from_patterns([b"TTTT".to_vec()]);
        assert!(collect(&ac, b"ACGACGACG").is_empty());
    }

    #[test]
    fn empty_text_no_matches() {
        let ac = AhoCorasick::from_patterns([b"A".to_vec()]);
        assert!(collect(&ac, b"").is_empty());
    }
}
