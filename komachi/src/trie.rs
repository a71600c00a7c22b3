//! 住所名辞書のトライ照合器
//!
//! このモジュールは、正規化済み文字列をキーとする文字単位のトライと、
//! 最長部分一致の検索機能を提供します。検索は以下の拡張を備えます。
//!
//! - **仮想接尾辞**: 行政区分の省略可能な接尾文字（区・町・市・村など）を、
//!   対象文字列を消費せずにキー側で通過できます。通過数が少ない一致が優先
//!   されます。
//! - **ワイルドカード**: 対象文字列中の指定された1文字を任意の格納文字に
//!   一致させます。1つの経路につき1回までです。
//! - **部分一致**: 途中で通過したすべての終端を返すか、最深の終端のみを
//!   返すかを選択できます。
//!
//! 一致結果は消費した文字数（深さ）と、元入力への来歴を保った未消費末尾
//! （[`CharSeq`]）を持ちます。

use hashbrown::HashMap;

use crate::charseq::CharSeq;
use crate::errors::{GeocodeError, Result};
use crate::utils::FromU32;

/// トライに格納される辞書行が実装するトレイト
///
/// 一致結果の並べ替えに使用されます。
pub trait AddressRow {
    /// 行の正規化済みキーを返します。
    fn key(&self) -> &str;

    /// 住居表示の実施フラグを返します。持たない行型は`None`のままで構いません。
    fn rsdt_addr_flg(&self) -> Option<u8> {
        None
    }
}

/// トライの内部ノード
#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, u32>,
    /// 終端フラグ。値リストが空のまま立っている場合は索引の破損を示す。
    terminal: bool,
    values: Vec<u32>,
}

/// 検索オプション
///
/// # フィールド
///
/// * `extra_challenges` - キー側で仮想的に通過できる文字の集合
/// * `partial_matches` - `true`なら途中の終端もすべて返す
/// * `fuzzy` - 対象文字列中でワイルドカードとして扱う文字
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions<'a> {
    pub extra_challenges: &'a [char],
    pub partial_matches: bool,
    pub fuzzy: Option<char>,
}

/// 一致結果
///
/// `depth`は対象文字列から消費した文字数、`unmatched`は位置`depth`から始まる
/// 未消費末尾です。
#[derive(Debug)]
pub struct TrieMatch<'t, V> {
    pub info: &'t V,
    pub depth: usize,
    pub unmatched: CharSeq,
}

/// 住所名のトライ照合器
///
/// 同一キーへの複数回の挿入を許し、終端には挿入順の値リストを保持します。
pub struct TrieAddressFinder<V> {
    nodes: Vec<TrieNode>,
    values: Vec<V>,
}

impl<V: AddressRow> Default for TrieAddressFinder<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// 検索中の一致候補（値の添字と経路情報）
struct Hit {
    value_idx: u32,
    depth: usize,
    virtual_len: usize,
}

impl<V: AddressRow> TrieAddressFinder<V> {
    /// 空のトライを作成します。
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            values: Vec::new(),
        }
    }

    /// 格納されている値の総数を返します。
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// トライが空かどうかを返します。
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// キーに値を追加します。
    ///
    /// 同一キーに複数の値を追加でき、値は挿入順に保持されます。
    pub fn append<K>(&mut self, key: K, value: V)
    where
        K: AsRef<str>,
    {
        let mut node_idx = 0usize;
        for ch in key.as_ref().chars() {
            node_idx = match self.nodes[node_idx].children.get(&ch) {
                Some(&child) => usize::from_u32(child),
                None => {
                    let child = self.nodes.len() as u32;
                    self.nodes.push(TrieNode::default());
                    self.nodes[node_idx].children.insert(ch, child);
                    usize::from_u32(child)
                }
            };
        }
        let value_idx = self.values.len() as u32;
        self.values.push(value);
        let node = &mut self.nodes[node_idx];
        node.terminal = true;
        node.values.push(value_idx);
    }

    /// 対象文字列の接頭辞に対する一致を検索します。
    ///
    /// `partial_matches`が`false`の場合は最深の一致のみを、`true`の場合は
    /// 経路上のすべての終端を返します。結果は深さの降順、仮想通過数の昇順、
    /// `rsdt_addr_flg`を持つ行の優先、キーの辞書順、挿入順で並びます。
    ///
    /// # エラー
    ///
    /// 値リストが空の終端に到達した場合、索引の破損として
    /// [`GeocodeError::InvalidState`]を返します。
    pub fn find<'t>(&'t self, target: &CharSeq, opts: &FindOptions) -> Result<Vec<TrieMatch<'t, V>>> {
        let chars: Vec<char> = target.chars().collect();
        let mut hits: Vec<Hit> = Vec::new();
        self.walk(0, 0, false, 0, &chars, opts, &mut hits)?;

        if !opts.partial_matches {
            let max_depth = hits.iter().map(|h| h.depth).max().unwrap_or(0);
            hits.retain(|h| h.depth == max_depth);
        }

        hits.sort_by(|a, b| {
            b.depth
                .cmp(&a.depth)
                .then_with(|| a.virtual_len.cmp(&b.virtual_len))
                .then_with(|| {
                    let fa = self.values[usize::from_u32(a.value_idx)].rsdt_addr_flg().is_some();
                    let fb = self.values[usize::from_u32(b.value_idx)].rsdt_addr_flg().is_some();
                    fb.cmp(&fa)
                })
                .then_with(|| {
                    self.values[usize::from_u32(a.value_idx)]
                        .key()
                        .cmp(self.values[usize::from_u32(b.value_idx)].key())
                })
                .then_with(|| a.value_idx.cmp(&b.value_idx))
        });
        let mut seen = hashbrown::HashSet::new();
        hits.retain(|h| seen.insert(h.value_idx));

        Ok(hits
            .into_iter()
            .map(|h| TrieMatch {
                info: &self.values[usize::from_u32(h.value_idx)],
                depth: h.depth,
                unmatched: target.tail_from(h.depth),
            })
            .collect())
    }

    /// 深さ優先でトライを歩き、到達した終端を収集します。
    ///
    /// `pos`は消費済みの対象文字数（= 一致の深さ）、`virtual_len`は対象を
    /// 消費せずに通過したキー文字数です。
    fn walk(
        &self,
        node_idx: usize,
        pos: usize,
        fuzzy_used: bool,
        virtual_len: usize,
        chars: &[char],
        opts: &FindOptions,
        hits: &mut Vec<Hit>,
    ) -> Result<()> {
        let node = &self.nodes[node_idx];
        if node.terminal {
            if node.values.is_empty() {
                return Err(GeocodeError::invalid_state(
                    "trie terminal without values",
                    "the dictionary index is corrupt",
                ));
            }
            for &v in &node.values {
                hits.push(Hit {
                    value_idx: v,
                    depth: pos,
                    virtual_len,
                });
            }
        }

        if pos < chars.len() {
            let ch = chars[pos];
            if opts.fuzzy == Some(ch) {
                if !fuzzy_used {
                    // ワイルドカードはどの格納文字とも一致する（経路につき1回）
                    for &child in node.children.values() {
                        self.walk(usize::from_u32(child), pos + 1, true, virtual_len, chars, opts, hits)?;
                    }
                }
            } else if let Some(&child) = node.children.get(&ch) {
                self.walk(usize::from_u32(child), pos + 1, fuzzy_used, virtual_len, chars, opts, hits)?;
            }
        }

        for &vc in opts.extra_challenges {
            if Some(vc) == chars.get(pos).copied() {
                continue;
            }
            if let Some(&child) = node.children.get(&vc) {
                self.walk(usize::from_u32(child), pos, fuzzy_used, virtual_len + 1, chars, opts, hits)?;
            }
        }

        Ok(())
    }
}
