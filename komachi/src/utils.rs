//! ユーティリティ関数と型変換トレイト
//!
//! 参照データCSVの行解析と、索引の添字変換に使う小さなヘルパーを
//! 提供します。

use csv_core::ReadRecordResult;

/// u32から他の型への変換を提供するトレイト
///
/// トライの子ノード添字はu32で保持されるため、配列アクセスの直前で
/// usizeへ変換します。
pub trait FromU32 {
    /// u32値から実装型を生成する
    fn from_u32(src: u32) -> Self;
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl FromU32 for usize {
    /// ポインタ幅が32ビット以上であることが保証されているため、
    /// この変換で値が失われることはありません。
    #[inline(always)]
    fn from_u32(src: u32) -> Self {
        src as usize
    }
}

/// CSV形式の1行をフィールドのベクターに分割する
///
/// ダブルクォートで囲まれたフィールドや、フィールド内のカンマも正しく
/// 処理します。参照データセットのCSV取り込みに使用されます。行全体を
/// レコード単位で読み取り、フィールドの終端位置から各セルを切り出します。
///
/// # 例
///
/// ```
/// # use komachi::utils::parse_csv_row;
/// let fields = parse_csv_row("131016,千代田区");
/// assert_eq!(fields, vec!["131016", "千代田区"]);
///
/// let quoted = parse_csv_row("131016,\"丸の内,一丁目\"");
/// assert_eq!(quoted, vec!["131016", "丸の内,一丁目"]);
/// ```
pub fn parse_csv_row(row: &str) -> Vec<String> {
    let mut reader = csv_core::Reader::new();
    let mut input = row.as_bytes();
    // 引用符の除去で出力が入力より長くなることはない
    let mut output = vec![0u8; row.len() + 1];
    let mut ends = vec![0usize; row.len() + 1];
    let mut out_pos = 0usize;
    let mut end_pos = 0usize;

    loop {
        let (result, consumed, written, ended) =
            reader.read_record(input, &mut output[out_pos..], &mut ends[end_pos..]);
        input = &input[consumed..];
        // 終端位置は渡したスライス基準なので絶対位置へ直す
        for end in &mut ends[end_pos..end_pos + ended] {
            *end += out_pos;
        }
        out_pos += written;
        end_pos += ended;
        match result {
            ReadRecordResult::InputEmpty => continue,
            ReadRecordResult::OutputFull | ReadRecordResult::OutputEndsFull => {
                let grown = output.len() * 2;
                output.resize(grown, 0);
                ends.resize(grown, 0);
            }
            ReadRecordResult::Record | ReadRecordResult::End => break,
        }
    }

    let mut fields = Vec::with_capacity(end_pos);
    let mut start = 0usize;
    for &end in &ends[..end_pos] {
        fields.push(String::from_utf8_lossy(&output[start..end]).into_owned());
        start = end;
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_row() {
        assert_eq!(
            &["011011", "札幌市", "中央区"],
            parse_csv_row("011011,札幌市,中央区").as_slice()
        );
    }

    #[test]
    fn test_parse_csv_row_with_quote() {
        assert_eq!(
            &["名称", "1,2番地"],
            parse_csv_row("名称,\"1,2番地\"").as_slice()
        );
    }

    #[test]
    fn test_parse_csv_row_trailing_empty_field() {
        assert_eq!(&["a", "b", ""], parse_csv_row("a,b,").as_slice());
    }

    #[test]
    fn test_parse_csv_row_embedded_quote() {
        assert_eq!(&["a\"b"], parse_csv_row("\"a\"\"b\"").as_slice());
    }
}
