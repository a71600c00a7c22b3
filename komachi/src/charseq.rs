//! 住所文字列の内部表現を提供するモジュール
//!
//! このモジュールは、正規化や辞書照合を経ても元の入力位置への対応を失わない
//! 文字連鎖（[`CharSeq`]）を提供します。各文字は[`CharNode`]として保持され、
//! 元入力での文字位置、または正規化によって挿入された文字であることを記録します。
//!
//! パイプラインの各ステージは、照合で消費した接頭辞を切り落とした残り
//! （未消費末尾）を次のステージへ渡します。連鎖はリンクポインタではなく
//! 連続バッファ上の添字で表現され、候補分岐時の複製が安価です。

use regex::Regex;

/// 文字連鎖を構成する1文字分のノード
///
/// # フィールド
///
/// * `ch` - 文字
/// * `org_index` - 元入力での文字位置（0始まり）。正規化で挿入された文字は`None`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharNode {
    ch: char,
    org_index: Option<usize>,
}

impl CharNode {
    /// 元入力由来のノードを作成します。
    #[inline(always)]
    pub const fn new(ch: char, org_index: usize) -> Self {
        Self {
            ch,
            org_index: Some(org_index),
        }
    }

    /// 正規化で挿入されたノードを作成します。
    #[inline(always)]
    pub const fn inserted(ch: char) -> Self {
        Self {
            ch,
            org_index: None,
        }
    }

    /// 文字を返します。
    #[inline(always)]
    pub const fn ch(&self) -> char {
        self.ch
    }

    /// 元入力での文字位置を返します。挿入文字の場合は`None`です。
    #[inline(always)]
    pub const fn org_index(&self) -> Option<usize> {
        self.org_index
    }
}

/// 来歴付き文字連鎖
///
/// 住所文字列の未消費部分を表します。非破壊的な書き換え（[`replace_all`]）と
/// 接頭辞の切り落とし（[`tail_from`]）をサポートし、いずれも触れていない区間の
/// ノードの来歴を保存します。
///
/// [`replace_all`]: Self::replace_all
/// [`tail_from`]: Self::tail_from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CharSeq {
    nodes: Vec<CharNode>,
}

impl CharSeq {
    /// 空の連鎖を作成します。
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// 入力文字列から連鎖を構築します。
    ///
    /// 各ノードの`org_index`には入力での文字位置（0始まり）が入ります。
    pub fn from_input(input: &str) -> Self {
        Self {
            nodes: input
                .chars()
                .enumerate()
                .map(|(i, ch)| CharNode::new(ch, i))
                .collect(),
        }
    }

    /// ノードの並びから連鎖を構築します。
    pub(crate) fn from_nodes(nodes: Vec<CharNode>) -> Self {
        Self { nodes }
    }

    /// 文字数を返します。
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 連鎖が空かどうかを返します。
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// ノードへの参照を返します。
    #[inline(always)]
    pub fn nodes(&self) -> &[CharNode] {
        &self.nodes
    }

    /// `pos`番目（0始まり）の文字を返します。
    #[inline(always)]
    pub fn char_at(&self, pos: usize) -> Option<char> {
        self.nodes.get(pos).map(|n| n.ch)
    }

    /// 文字のイテレータを返します。
    pub fn chars(&self) -> impl Iterator<Item = char> + '_ {
        self.nodes.iter().map(|n| n.ch)
    }

    /// `depth`文字を消費した残りの連鎖を返します。
    ///
    /// 返される連鎖のノードは元の来歴を保ったままです。`depth`が文字数以上の
    /// 場合は空の連鎖を返します。
    pub fn tail_from(&self, depth: usize) -> Self {
        if depth >= self.nodes.len() {
            return Self::new();
        }
        Self {
            nodes: self.nodes[depth..].to_vec(),
        }
    }

    /// 先頭の`depth`文字のみを持つ連鎖を返します。
    pub fn head(&self, depth: usize) -> Self {
        Self {
            nodes: self.nodes[..depth.min(self.nodes.len())].to_vec(),
        }
    }

    /// 条件を満たす文字を取り除いた連鎖を返します。
    pub fn remove_chars<F>(&self, mut pred: F) -> Self
    where
        F: FnMut(char) -> bool,
    {
        Self {
            nodes: self
                .nodes
                .iter()
                .copied()
                .filter(|n| !pred(n.ch))
                .collect(),
        }
    }

    /// 各文字に1対1の変換を適用した連鎖を返します。
    ///
    /// 幅寄せや字体の折り畳みのような1文字対1文字の正規化に使用します。
    /// 変換された文字も元の来歴を保持します。
    pub fn map_chars<F>(&self, mut f: F) -> Self
    where
        F: FnMut(char) -> char,
    {
        Self {
            nodes: self
                .nodes
                .iter()
                .map(|n| CharNode {
                    ch: f(n.ch),
                    org_index: n.org_index,
                })
                .collect(),
        }
    }

    /// 正規表現による非破壊的な全置換を行った連鎖を返します。
    ///
    /// マッチしなかった区間のノードは来歴ごと保存されます。置換文字列中の
    /// `$1`〜`$9`はキャプチャグループを参照し、グループ由来の文字は元の来歴を
    /// 引き継ぎます。それ以外の置換文字は挿入扱い（`org_index = None`）に
    /// なります。
    pub fn replace_all(&self, re: &Regex, replacement: &str) -> Self {
        let text = self.to_string();
        // 生成文字列の文字位置はノード添字と1対1に対応する
        let byte_to_char: hashbrown::HashMap<usize, usize> = text
            .char_indices()
            .enumerate()
            .map(|(ci, (bi, _))| (bi, ci))
            .collect();

        let mut out: Vec<CharNode> = Vec::with_capacity(self.nodes.len());
        let mut last_char = 0usize;

        for caps in re.captures_iter(&text) {
            let m = caps.get(0).unwrap();
            let start = byte_to_char[&m.start()];
            let end = if m.end() == text.len() {
                self.nodes.len()
            } else {
                byte_to_char[&m.end()]
            };

            out.extend_from_slice(&self.nodes[last_char..start]);
            self.expand_replacement(&caps, replacement, &byte_to_char, &mut out);
            last_char = end;
        }
        out.extend_from_slice(&self.nodes[last_char..]);
        Self { nodes: out }
    }

    /// 置換テンプレートを展開します。
    fn expand_replacement(
        &self,
        caps: &regex::Captures,
        replacement: &str,
        byte_to_char: &hashbrown::HashMap<usize, usize>,
        out: &mut Vec<CharNode>,
    ) {
        let mut chars = replacement.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '$' {
                if let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                    chars.next();
                    if let Some(g) = caps.get(d as usize) {
                        let gs = byte_to_char[&g.start()];
                        let ge = gs + g.as_str().chars().count();
                        out.extend_from_slice(&self.nodes[gs..ge]);
                    }
                    continue;
                }
            }
            out.push(CharNode::inserted(ch));
        }
    }
}

impl From<(char, Option<usize>)> for CharNode {
    fn from((ch, org_index): (char, Option<usize>)) -> Self {
        match org_index {
            Some(i) => CharNode::new(ch, i),
            None => CharNode::inserted(ch),
        }
    }
}

impl std::fmt::Display for CharSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for n in &self.nodes {
            std::fmt::Write::write_char(f, n.ch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_input_provenance() {
        let seq = CharSeq::from_input("千代田区");
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.to_string(), "千代田区");
        assert_eq!(seq.nodes()[2].org_index(), Some(2));
    }

    #[test]
    fn test_tail_from_keeps_provenance() {
        let seq = CharSeq::from_input("東京都千代田区");
        let tail = seq.tail_from(3);
        assert_eq!(tail.to_string(), "千代田区");
        assert_eq!(tail.nodes()[0].org_index(), Some(3));
    }

    #[test]
    fn test_tail_from_past_end() {
        let seq = CharSeq::from_input("東京");
        assert!(seq.tail_from(5).is_empty());
    }

    #[test]
    fn test_replace_all_untouched_runs() {
        let re = Regex::new(r"[ \t]").unwrap();
        let seq = CharSeq::from_input("千代田区 丸の内");
        let replaced = seq.replace_all(&re, "");
        assert_eq!(replaced.to_string(), "千代田区丸の内");
        // 置換区間の後ろの来歴は元のまま
        assert_eq!(replaced.nodes()[4].org_index(), Some(5));
    }

    #[test]
    fn test_replace_all_group_provenance() {
        let re = Regex::new(r"(\d+)番地").unwrap();
        let seq = CharSeq::from_input("12番地3");
        let replaced = seq.replace_all(&re, "$1-");
        assert_eq!(replaced.to_string(), "12-3");
        assert_eq!(replaced.nodes()[0].org_index(), Some(0));
        assert_eq!(replaced.nodes()[1].org_index(), Some(1));
        // 挿入されたハイフンには来歴が無い
        assert_eq!(replaced.nodes()[2].org_index(), None);
        assert_eq!(replaced.nodes()[3].org_index(), Some(4));
    }

    #[test]
    fn test_map_chars_keeps_provenance() {
        let seq = CharSeq::from_input("１２３");
        let mapped = seq.map_chars(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - 0xFEE0).unwrap(),
            _ => c,
        });
        assert_eq!(mapped.to_string(), "123");
        assert_eq!(mapped.nodes()[1].org_index(), Some(1));
    }
}
