//! Mô hình dữ liệu lõi cho việc ghi nhận encounter: cây control của form,
//! danh sách observation gửi lên kho lưu trữ và các capability bên ngoài.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Cấu hình cho các bước chuyển đổi form <-> observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransformConfig {
    /// Ghi đè namespace của observation (mặc định `<tên form>.<phiên bản>`).
    pub namespace: Option<String>,
    /// Các khóa đánh dấu một object là tệp đính kèm.
    pub attachment_reference_keys: Vec<String>,
    /// Cách mã hóa script lưu kèm form.
    pub script_encoding: ScriptEncoding,
    /// Bật chế độ phát hiện concept gắn với nhiều datatype.
    pub strict_datatypes: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            attachment_reference_keys: vec!["url".to_string()],
            script_encoding: ScriptEncoding::Plain,
            strict_datatypes: false,
        }
    }
}

impl TransformConfig {
    /// Namespace áp dụng cho mọi observation sinh ra từ form này.
    pub fn namespace_for(&self, form: &FormDefinition) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| format!("{}.{}", form.name, form.version))
    }
}

/// Cách script được nhúng trong metadata của form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScriptEncoding {
    #[default]
    Plain,
    Base64,
}

/// Định nghĩa form đã phát hành. `schema` là tài liệu tùy ý, chỉ đọc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormDefinition {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub schema: Value,
}

/// Loại control trên giao diện nhập liệu.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Text,
    Number,
    Date,
    Datetime,
    Select,
    Multiselect,
    Section,
    Group,
}

/// Một field trong cây control. `id` đồng thời là field path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlNode {
    pub id: String,
    #[serde(default)]
    pub concept_id: String,
    pub kind: ControlKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ControlNode>,
}

impl ControlNode {
    /// Tạo control rỗng với id, concept và loại cho trước.
    pub fn new(id: impl Into<String>, concept_id: impl Into<String>, kind: ControlKind) -> Self {
        Self {
            id: id.into(),
            concept_id: concept_id.into(),
            kind,
            value: None,
            label: None,
            units: None,
            interpretation: None,
            comment: None,
            children: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_children(mut self, children: Vec<ControlNode>) -> Self {
        self.children = children;
        self
    }
}

/// Câu trả lời dạng mã hóa. Không diễn giải nội dung, chỉ giữ nguyên.
#[derive(Debug, Clone, PartialEq)]
pub struct CodedAnswer {
    pub id: String,
    pub display_text: Option<String>,
    pub extra: Map<String, Value>,
}

impl CodedAnswer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_text: None,
            extra: Map::new(),
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display_text = Some(display.into());
        self
    }

    /// Nhận dạng object có `id` dạng chuỗi và không có `url`.
    /// Trả lại object gốc nếu không khớp.
    pub fn from_json(mut map: Map<String, Value>) -> Result<Self, Map<String, Value>> {
        let is_coded = map.get("id").is_some_and(Value::is_string) && !map.contains_key("url");
        if !is_coded {
            return Err(map);
        }
        let id = match map.remove("id") {
            Some(Value::String(id)) => id,
            _ => return Err(map),
        };
        let display_text = match map.remove("displayText") {
            Some(Value::String(text)) => Some(text),
            Some(other) => {
                map.insert("displayText".to_string(), other);
                None
            }
            None => None,
        };
        Ok(Self {
            id,
            display_text,
            extra: map,
        })
    }

    pub fn into_json(self) -> Value {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(self.id));
        if let Some(text) = self.display_text {
            map.insert("displayText".to_string(), Value::String(text));
        }
        map.extend(self.extra);
        Value::Object(map)
    }
}

/// Giá trị thô do người dùng nhập vào một control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum FieldValue {
    Bool(bool),
    Number(Number),
    Text(String),
    Date(DateTime<Utc>),
    Coded(CodedAnswer),
    List(Vec<FieldValue>),
    /// Các dạng khác (tệp đính kèm, object lạ...) được giữ nguyên.
    Json(Value),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(flag) => FieldValue::Bool(flag),
            Value::Number(number) => FieldValue::Number(number),
            Value::String(text) => FieldValue::Text(text),
            Value::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from).collect())
            }
            Value::Object(map) => match CodedAnswer::from_json(map) {
                Ok(coded) => FieldValue::Coded(coded),
                Err(map) => FieldValue::Json(Value::Object(map)),
            },
            Value::Null => FieldValue::Json(Value::Null),
        }
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Bool(flag) => Value::Bool(flag),
            FieldValue::Number(number) => Value::Number(number),
            FieldValue::Text(text) => Value::String(text),
            FieldValue::Date(at) => Value::String(canonical_timestamp(&at)),
            FieldValue::Coded(coded) => coded.into_json(),
            FieldValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            FieldValue::Json(other) => other,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<i64> for FieldValue {
    fn from(number: i64) -> Self {
        FieldValue::Number(number.into())
    }
}

impl From<CodedAnswer> for FieldValue {
    fn from(coded: CodedAnswer) -> Self {
        FieldValue::Coded(coded)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(at: DateTime<Utc>) -> Self {
        FieldValue::Date(at)
    }
}

/// Giá trị observation trên đường truyền.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ObsValue {
    Bool(bool),
    Number(Number),
    Text(String),
    Coded(CodedAnswer),
    Json(Value),
}

impl From<Value> for ObsValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(flag) => ObsValue::Bool(flag),
            Value::Number(number) => ObsValue::Number(number),
            Value::String(text) => ObsValue::Text(text),
            Value::Object(map) => match CodedAnswer::from_json(map) {
                Ok(coded) => ObsValue::Coded(coded),
                Err(map) => ObsValue::Json(Value::Object(map)),
            },
            other => ObsValue::Json(other),
        }
    }
}

impl From<ObsValue> for Value {
    fn from(value: ObsValue) -> Self {
        match value {
            ObsValue::Bool(flag) => Value::Bool(flag),
            ObsValue::Number(number) => Value::Number(number),
            ObsValue::Text(text) => Value::String(text),
            ObsValue::Coded(coded) => coded.into_json(),
            ObsValue::Json(other) => other,
        }
    }
}

/// Tham chiếu tới concept lâm sàng.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConceptRef {
    pub id: String,
}

/// Observation phẳng (hoặc nhóm) gửi tới kho encounter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub concept: ConceptRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default)]
    pub value: Option<ObsValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Observation>,
}

impl Observation {
    pub fn for_concept(concept_id: impl Into<String>) -> Self {
        Self {
            concept: ConceptRef {
                id: concept_id.into(),
            },
            ..Self::default()
        }
    }

    /// Observation nhóm: không có giá trị, có thành viên con.
    pub fn is_group(&self) -> bool {
        self.value.is_none() && !self.children.is_empty()
    }

    /// Khóa liên kết với control: field path, nếu thiếu thì concept id.
    pub fn correlation_key(&self) -> &str {
        match self.field_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => &self.concept.id,
        }
    }
}

/// Metadata của form dùng cho bước chạy script khi lưu.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub save_script: Option<Value>,
}

impl FormMetadata {
    /// Tên hiển thị dùng trong thông báo lỗi.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

/// Ngữ cảnh truyền cho script: luôn là bản sao sâu của danh sách observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptContext {
    pub observations: Vec<Observation>,
    pub patient_id: String,
    pub form_id: String,
    pub form_name: String,
    pub form_version: String,
}

/// Giá trị bị ném ra khi script thất bại.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptFailure {
    /// Lỗi có thông điệp (tương đương một `Error`).
    Error(String),
    /// Chuỗi thô.
    Text(String),
    /// Giá trị bất kỳ, có thể có trường `message`.
    Value(Value),
    Unknown,
}

impl ScriptFailure {
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        ScriptFailure::Error(err.to_string())
    }

    /// Trích thông điệp theo thứ tự: lỗi, chuỗi thô, trường `message`.
    pub fn describe(&self) -> String {
        match self {
            ScriptFailure::Error(message) | ScriptFailure::Text(message) => message.clone(),
            ScriptFailure::Value(value) => value
                .as_str()
                .or_else(|| value.get("message").and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| UNKNOWN_SCRIPT_ERROR.to_string()),
            ScriptFailure::Unknown => UNKNOWN_SCRIPT_ERROR.to_string(),
        }
    }
}

pub const UNKNOWN_SCRIPT_ERROR: &str = "Unknown error occurred";

/// Capability thực thi script (sandbox nằm ngoài phạm vi crate này).
pub trait ScriptExecutor {
    /// Trả về `Some(list)` để thay thế danh sách observation,
    /// `None` để dùng danh sách trong `context` (có thể đã bị script sửa).
    fn execute(
        &self,
        form_state: Option<&Value>,
        script: &str,
        patient_id: &str,
        context: &mut ScriptContext,
    ) -> Result<Option<Vec<Observation>>, ScriptFailure>;
}

/// Nguồn cung cấp định nghĩa form (mạng, cấu hình...).
pub trait FormDefinitionProvider {
    fn fetch(&self, form_id: &str) -> Result<FormDefinition, EncounterError>;
}

/// Dữ liệu gửi tới API lưu encounter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncounterPayload {
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_type_id: Option<String>,
    pub form_id: String,
    pub observations: Vec<Observation>,
}

/// Chuỗi thời điểm chuẩn (ISO 8601, mili giây, UTC).
pub fn canonical_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lỗi chung ở biên đọc/ghi dữ liệu.
#[derive(Debug, thiserror::Error)]
pub enum EncounterError {
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
    #[error("Không tìm thấy form: {0}")]
    MissingForm(String),
}

/// Lỗi duy nhất của bước chạy script khi lưu form.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Save script for form '{form_name}' failed: {detail}")]
pub struct ScriptError {
    pub form_name: String,
    pub detail: String,
}
