//! 工具层：Tool trait、注册表、带超时的执行器、调用格式 Schema 与具体的远程工具

pub mod etl;
pub mod executor;
pub mod http;
pub mod registry;
pub mod schema;

pub use etl::EtlTriggerTool;
pub use executor::ToolExecutor;
pub use http::HttpTool;
pub use registry::{Tool, ToolOutput, ToolRegistry};
pub use schema::tool_call_schema_json;

/// 系统假定存在的工具名（具体实现由外部服务提供）
pub mod names {
    /// 结构化数据查询（资产数据库）
    pub const QUERY_ASSET_DATABASE: &str = "query_asset_database";
    /// 复杂 SQL（与 QUERY_ASSET_DATABASE 可互换）
    pub const SQL_AGENT: &str = "sql_agent";
    /// 内部文档 / 术语检索
    pub const SEARCH_DOCUMENTS: &str = "search_internal_documents";
    pub const WEB_SEARCH: &str = "tools_web_search";
    pub const ENHANCED_WEB_RESEARCH: &str = "enhanced_web_research";
    pub const CREATE_VISUALIZATION: &str = "create_visualization";
    pub const ETL_TRIGGER: &str = "trigger_spreadsheet_etl_and_get_summary";
    pub const INTENT_ANALYSIS: &str = "enhanced_intent_analysis";
}
