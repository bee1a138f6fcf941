//! Browsing the symbol tables.
//!
//! Browsing is advisory: a filter that matches nothing yields an empty list
//! rather than an error.

use crate::context::{DataTypeEntry, DriverContext, MAX_TYPE_DEPTH, SymbolEntry};
use crate::tag::ArrayInfo;

/// An addressable item found while browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseItem {
    /// Full symbolic address, usable with read and write.
    pub address: String,
    pub type_name: String,
    pub array_info: Vec<ArrayInfo>,
    /// Direct members of structured items; not expanded further.
    pub children: Vec<BrowseItem>,
}

/// List the items matching `filter`.
///
/// An empty filter lists every symbol. Otherwise the filter is a dotted path
/// whose last segment may end in `*` to match by prefix. A bare program name
/// such as `MAIN` lists the variables of that program.
pub fn browse(context: &DriverContext, filter: &str) -> Vec<BrowseItem> {
    let filter = filter.trim();
    let mut items = if filter.is_empty() || filter == "*" {
        context
            .symbols()
            .map(|symbol| symbol_item(context, symbol))
            .collect()
    } else {
        browse_path(context, filter)
    };
    items.sort_by(|a, b| a.address.cmp(&b.address));
    items
}

fn browse_path(context: &DriverContext, filter: &str) -> Vec<BrowseItem> {
    let segments: Vec<&str> = filter.split('.').collect();
    let symbol_segments = segments.len().min(2);
    let (symbol_path, members) = segments.split_at(symbol_segments);
    let symbol_name = symbol_path.join(".");

    if members.is_empty() {
        return match_symbols(context, &symbol_name);
    }
    if members.len() > MAX_TYPE_DEPTH {
        return Vec::new();
    }
    let Some(symbol) = context.symbol(&symbol_name) else {
        return Vec::new();
    };

    let mut address = symbol.name.clone();
    let mut type_name = symbol.data_type_name.clone();
    let Some((last, walk)) = members.split_last() else {
        return Vec::new();
    };
    for segment in walk {
        let Some(child) = struct_members(context, &type_name)
            .iter()
            .find(|c| c.name == *segment)
        else {
            return Vec::new();
        };
        address = format!("{address}.{segment}");
        type_name = child.type_name.clone();
    }

    struct_members(context, &type_name)
        .iter()
        .filter(|child| segment_matches(last, &child.name))
        .map(|child| {
            let mut item = member_item(context, &format!("{address}.{}", child.name), child);
            item.children = children_of(context, &item.address, &child.type_name);
            item
        })
        .collect()
}

fn match_symbols(context: &DriverContext, pattern: &str) -> Vec<BrowseItem> {
    if let Some(prefix) = pattern.strip_suffix('*') {
        return context
            .symbols()
            .filter(|symbol| symbol.name.starts_with(prefix))
            .map(|symbol| symbol_item(context, symbol))
            .collect();
    }
    if let Some(symbol) = context.symbol(pattern) {
        return vec![symbol_item(context, symbol)];
    }
    let program = format!("{pattern}.");
    context
        .symbols()
        .filter(|symbol| symbol.name.starts_with(&program))
        .map(|symbol| symbol_item(context, symbol))
        .collect()
}

fn segment_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

fn symbol_item(context: &DriverContext, symbol: &SymbolEntry) -> BrowseItem {
    BrowseItem {
        address: symbol.name.clone(),
        type_name: symbol.data_type_name.clone(),
        array_info: type_dimensions(context, &symbol.data_type_name),
        children: children_of(context, &symbol.name, &symbol.data_type_name),
    }
}

fn member_item(context: &DriverContext, address: &str, member: &DataTypeEntry) -> BrowseItem {
    let array_info = if member.array_info.is_empty() {
        type_dimensions(context, &member.type_name)
    } else {
        member.array_info.clone()
    };
    BrowseItem {
        address: address.to_string(),
        type_name: member.type_name.clone(),
        array_info,
        children: Vec::new(),
    }
}

fn children_of(context: &DriverContext, address: &str, type_name: &str) -> Vec<BrowseItem> {
    struct_members(context, type_name)
        .iter()
        .map(|child| member_item(context, &format!("{address}.{}", child.name), child))
        .collect()
}

fn struct_members<'a>(context: &'a DriverContext, type_name: &str) -> &'a [DataTypeEntry] {
    context
        .data_type(type_name)
        .map(|entry| context.concrete_type(entry).children.as_slice())
        .unwrap_or_default()
}

fn type_dimensions(context: &DriverContext, type_name: &str) -> Vec<ArrayInfo> {
    context
        .data_type(type_name)
        .map(|entry| context.concrete_type(entry).array_info.clone())
        .unwrap_or_default()
}
