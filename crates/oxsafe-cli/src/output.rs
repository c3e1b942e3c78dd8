use comfy_table::Table;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;

/// Create a styled table for output
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table
}

/// Render a stored timestamp, with 0 meaning "never".
pub fn format_timestamp(t: i64) -> String {
    if t == 0 {
        return "never".to_string();
    }
    oxsafe_core::import::format_xml_date_time(t)
        .map_or_else(|| t.to_string(), |s| format!("{s}Z"))
}
