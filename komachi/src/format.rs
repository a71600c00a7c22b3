//! 解決結果の出力フォーマッタ
//!
//! [`Query`]レコードをCSV・JSON・NDJSONの各形式で書き出します。JSONでは
//! 未解決の文字列フィールドは空文字列、未付与の座標は数値のnullで表現
//! されます。CSVの列集合は設定で選択できます。

use std::io::Write;
use std::str::FromStr;

use serde_json::{json, Value};

use crate::errors::{GeocodeError, Result};
use crate::query::Query;

/// 出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
    Ndjson,
}

impl FromStr for OutputFormat {
    type Err = GeocodeError;

    fn from_str(format: &str) -> Result<Self> {
        match format {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err(GeocodeError::invalid_format(
                "format",
                format!("unknown output format: {}", format),
            )),
        }
    }
}

/// CSVの出力列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Input,
    Latitude,
    Longitude,
    Prefecture,
    City,
    LgCode,
    Town,
    TownId,
    Other,
    Block,
    BlockId,
}

impl Column {
    /// 既定の列集合を返します。
    pub fn default_set() -> Vec<Self> {
        vec![
            Self::Input,
            Self::Latitude,
            Self::Longitude,
            Self::Prefecture,
            Self::City,
            Self::LgCode,
            Self::Town,
            Self::TownId,
            Self::Other,
            Self::Block,
            Self::BlockId,
        ]
    }

    /// ヘッダ行での列名を返します。
    pub const fn header(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Prefecture => "prefecture",
            Self::City => "city",
            Self::LgCode => "lg_code",
            Self::Town => "town",
            Self::TownId => "town_id",
            Self::Other => "other",
            Self::Block => "block",
            Self::BlockId => "block_id",
        }
    }
}

impl FromStr for Column {
    type Err = GeocodeError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "input" => Ok(Self::Input),
            "latitude" => Ok(Self::Latitude),
            "longitude" => Ok(Self::Longitude),
            "prefecture" => Ok(Self::Prefecture),
            "city" => Ok(Self::City),
            "lg_code" => Ok(Self::LgCode),
            "town" => Ok(Self::Town),
            "town_id" => Ok(Self::TownId),
            "other" => Ok(Self::Other),
            "block" => Ok(Self::Block),
            "block_id" => Ok(Self::BlockId),
            _ => Err(GeocodeError::invalid_format(
                "columns",
                format!("unknown column: {}", name),
            )),
        }
    }
}

/// レコードを逐次書き出すフォーマッタ
pub trait QueryFormatter {
    /// ストリームの先頭で一度呼ばれます。
    fn begin(&mut self, out: &mut dyn Write) -> Result<()> {
        let _ = out;
        Ok(())
    }

    /// 1レコードを書き出します。
    fn write_record(&mut self, out: &mut dyn Write, query: &Query) -> Result<()>;

    /// ストリームの末尾で一度呼ばれます。
    fn finish(&mut self, out: &mut dyn Write) -> Result<()> {
        let _ = out;
        Ok(())
    }
}

/// 形式に応じたフォーマッタを作成します。
pub fn formatter_for(
    format: OutputFormat,
    columns: Vec<Column>,
    header: bool,
) -> Box<dyn QueryFormatter> {
    match format {
        OutputFormat::Csv => Box::new(CsvFormatter::new(columns, header)),
        OutputFormat::Json => Box::new(JsonFormatter::new()),
        OutputFormat::Ndjson => Box::new(NdjsonFormatter),
    }
}

/// 市区町村の表示文字列（郡名・区名を含む）を組み立てます。
fn city_display(query: &Query) -> String {
    format!(
        "{}{}{}",
        query.county.as_deref().unwrap_or(""),
        query.city.as_deref().unwrap_or(""),
        query.ward.as_deref().unwrap_or("")
    )
}

/// 町字の表示文字列を組み立てます。
fn town_display(query: &Query) -> String {
    let mut town = query.oaza_cho.clone().unwrap_or_default();
    if let Some(chome) = &query.chome {
        town.push_str(chome);
        town.push_str("丁目");
    }
    if let Some(koaza) = &query.koaza {
        town.push_str(koaza);
    }
    town
}

/// JSON・NDJSON共通のオブジェクト表現を作ります。
///
/// 未解決の文字列フィールドは空文字列、未付与の座標はnullです。
fn query_to_json(query: &Query) -> Value {
    fn s(value: &Option<String>) -> Value {
        Value::String(value.clone().unwrap_or_default())
    }
    fn f(value: Option<f64>) -> Value {
        value.map_or(Value::Null, Value::from)
    }

    json!({
        "input": query.input,
        "match_level": query.match_level.as_str(),
        "coordinate_level": query.coordinate_level.as_str(),
        "latitude": f(query.rep_lat),
        "longitude": f(query.rep_lon),
        "lg_code": s(&query.lg_code),
        "machiaza_id": s(&query.machiaza_id),
        "pref": s(&query.pref),
        "county": s(&query.county),
        "city": s(&query.city),
        "ward": s(&query.ward),
        "oaza_cho": s(&query.oaza_cho),
        "chome": s(&query.chome),
        "koaza": s(&query.koaza),
        "block": s(&query.block),
        "block_id": s(&query.block_id),
        "rsdt_num": s(&query.rsdt_num),
        "rsdt_id": s(&query.rsdt_id),
        "rsdt_num2": s(&query.rsdt_num2),
        "rsdt2_id": s(&query.rsdt2_id),
        "prc_num1": s(&query.prc_num1),
        "prc_num2": s(&query.prc_num2),
        "prc_num3": s(&query.prc_num3),
        "prc_id": s(&query.prc_id),
        "other": query.temp_address.to_string(),
    })
}

/// CSVフォーマッタ
///
/// 文字列セルは二重引用符で囲み、数値セルは裸のまま出力します。
pub struct CsvFormatter {
    columns: Vec<Column>,
    header: bool,
}

impl CsvFormatter {
    /// 列集合とヘッダ出力の有無を指定して作成します。
    pub fn new(columns: Vec<Column>, header: bool) -> Self {
        Self { columns, header }
    }
}

/// 文字列セルを二重引用符で囲んで書き出します。内部の引用符は重ねて
/// エスケープします。
fn write_quoted(out: &mut dyn Write, cell: &str) -> Result<()> {
    out.write_all(b"\"")?;
    for ch in cell.chars() {
        if ch == '"' {
            out.write_all(b"\"\"")?;
        } else {
            let mut buf = [0u8; 4];
            out.write_all(ch.encode_utf8(&mut buf).as_bytes())?;
        }
    }
    out.write_all(b"\"")?;
    Ok(())
}

impl QueryFormatter for CsvFormatter {
    fn begin(&mut self, out: &mut dyn Write) -> Result<()> {
        if !self.header {
            return Ok(());
        }
        for (i, column) in self.columns.iter().enumerate() {
            if i != 0 {
                out.write_all(b",")?;
            }
            out.write_all(column.header().as_bytes())?;
        }
        out.write_all(b"\n")?;
        Ok(())
    }

    fn write_record(&mut self, out: &mut dyn Write, query: &Query) -> Result<()> {
        for (i, column) in self.columns.iter().enumerate() {
            if i != 0 {
                out.write_all(b",")?;
            }
            match column {
                Column::Input => write_quoted(out, &query.input)?,
                Column::Latitude => {
                    if let Some(lat) = query.rep_lat {
                        write!(out, "{}", lat)?;
                    }
                }
                Column::Longitude => {
                    if let Some(lon) = query.rep_lon {
                        write!(out, "{}", lon)?;
                    }
                }
                Column::Prefecture => write_quoted(out, query.pref.as_deref().unwrap_or(""))?,
                Column::City => write_quoted(out, &city_display(query))?,
                Column::LgCode => write_quoted(out, query.lg_code.as_deref().unwrap_or(""))?,
                Column::Town => write_quoted(out, &town_display(query))?,
                Column::TownId => write_quoted(out, query.machiaza_id.as_deref().unwrap_or(""))?,
                Column::Other => write_quoted(out, &query.temp_address.to_string())?,
                Column::Block => write_quoted(out, query.block.as_deref().unwrap_or(""))?,
                Column::BlockId => write_quoted(out, query.block_id.as_deref().unwrap_or(""))?,
            }
        }
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// JSON配列フォーマッタ
pub struct JsonFormatter {
    first: bool,
}

impl JsonFormatter {
    /// 新しいフォーマッタを作成します。
    pub fn new() -> Self {
        Self { first: true }
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryFormatter for JsonFormatter {
    fn begin(&mut self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"[")?;
        Ok(())
    }

    fn write_record(&mut self, out: &mut dyn Write, query: &Query) -> Result<()> {
        if !self.first {
            out.write_all(b",")?;
        }
        self.first = false;
        out.write_all(b"\n")?;
        serde_json::to_writer(&mut *out, &query_to_json(query))?;
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"\n]\n")?;
        Ok(())
    }
}

/// NDJSONフォーマッタ。1行に1オブジェクトを書き出します。
pub struct NdjsonFormatter;

impl QueryFormatter for NdjsonFormatter {
    fn write_record(&mut self, out: &mut dyn Write, query: &Query) -> Result<()> {
        serde_json::to_writer(&mut *out, &query_to_json(query))?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MatchLevel;

    fn sample() -> Query {
        let mut q = Query::new("東京都千代田区丸の内1-2");
        q.temp_address = crate::charseq::CharSeq::from_input("2");
        q.match_level = MatchLevel::ResidentialBlock;
        q.coordinate_level = MatchLevel::ResidentialBlock;
        q.rep_lat = Some(35.681);
        q.rep_lon = Some(139.767);
        q.pref = Some("東京都".to_string());
        q.city = Some("千代田区".to_string());
        q.lg_code = Some("131016".to_string());
        q.oaza_cho = Some("丸の内".to_string());
        q.chome = Some("1".to_string());
        q.machiaza_id = Some("0001001".to_string());
        q.block = Some("1".to_string());
        q.block_id = Some("001".to_string());
        q
    }

    #[test]
    fn test_csv_with_header() {
        let mut out = Vec::new();
        let mut fmt = CsvFormatter::new(Column::default_set(), true);
        fmt.begin(&mut out).unwrap();
        fmt.write_record(&mut out, &sample()).unwrap();
        fmt.finish(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "input,latitude,longitude,prefecture,city,lg_code,town,town_id,other,block,block_id"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"東京都千代田区丸の内1-2\",35.681,139.767,\"東京都\",\"千代田区\""));
        assert!(row.contains("\"丸の内1丁目\""));
    }

    #[test]
    fn test_csv_without_header() {
        let mut out = Vec::new();
        let mut fmt = CsvFormatter::new(vec![Column::Input, Column::Latitude], false);
        fmt.begin(&mut out).unwrap();
        fmt.write_record(&mut out, &sample()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "\"東京都千代田区丸の内1-2\",35.681\n");
    }

    #[test]
    fn test_csv_quote_escaping() {
        let mut out = Vec::new();
        write_quoted(&mut out, "a\"b").unwrap();
        assert_eq!(out, b"\"a\"\"b\"");
    }

    #[test]
    fn test_json_array_shape() {
        let mut out = Vec::new();
        let mut fmt = JsonFormatter::new();
        fmt.begin(&mut out).unwrap();
        fmt.write_record(&mut out, &sample()).unwrap();
        fmt.write_record(&mut out, &sample()).unwrap();
        fmt.finish(&mut out).unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["pref"], "東京都");
        assert_eq!(array[0]["match_level"], "residential_block");
    }

    #[test]
    fn test_json_sentinels() {
        let mut out = Vec::new();
        let mut fmt = JsonFormatter::new();
        fmt.begin(&mut out).unwrap();
        fmt.write_record(&mut out, &Query::new("未解決の行")).unwrap();
        fmt.finish(&mut out).unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        let record = &parsed.as_array().unwrap()[0];
        // 未解決の文字列は空文字列、座標はnull
        assert_eq!(record["pref"], "");
        assert!(record["latitude"].is_null());
        assert_eq!(record["match_level"], "unknown");
    }

    #[test]
    fn test_ndjson_one_object_per_line() {
        let mut out = Vec::new();
        let mut fmt = NdjsonFormatter;
        fmt.write_record(&mut out, &sample()).unwrap();
        fmt.write_record(&mut out, &sample()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        for line in text.lines() {
            let parsed: Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["city"], "千代田区");
        }
    }
}
