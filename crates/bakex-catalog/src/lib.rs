//! Reconstruction of the minimal system catalog from page images.
//!
//! SQL Server's system base tables sit on pages stamped with well-known
//! header `obj_id` values. Decoding a handful of their columns with
//! hand-rolled layout knowledge is enough to map a user table name to its
//! column list and to the `obj_id` stamp its data pages carry:
//!
//! - `sysschobjs` (34): object id, schema id, two-char type code, name.
//! - `syscolpars` (41): per-object ordered column definitions.
//! - `sysrowsets` (5) ⋈ `sysallocunits` (7): rowset → allocation unit;
//!   for in-row data units the page stamp is `(auid >> 16) & 0xFFFF`.
//!
//! The scan produces a frozen [`Catalog`] snapshot, so later queries need
//! no synchronization.

mod record;

pub use record::{extract_first_var_column, var_region_name};

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use bakex_error::{BakError, Result};
use bakex_types::{
    PageHeader, PageId, PageType, RecordStatus, SqlType, TableSchema, ColumnDef, slot_offset,
    PAGE_HEADER_SIZE, PAGE_SIZE,
};

// Well-known page-header obj_id stamps of the system base tables.
pub const OBJ_SYSROWSETS: u32 = 5;
pub const OBJ_SYSALLOCUNITS: u32 = 7;
pub const OBJ_SYSSCHOBJS: u32 = 34;
pub const OBJ_SYSCOLPARS: u32 = 41;
pub const OBJ_SYSIDXSTATS: u32 = 54;
pub const OBJ_SYSOBJVALUES: u32 = 60;

/// Read access to the recovered page corpus.
///
/// Both the indexed store and the in-memory store implement this; the
/// catalog never touches stripe files directly.
pub trait PageStore {
    /// Copy one 8 KiB page image into `out`; `false` when unavailable.
    fn read_page(&self, id: PageId, out: &mut [u8]) -> bool;

    /// Every known page whose header `obj_id` stamp equals `obj_id`.
    fn pages_with_obj_id(&self, obj_id: u32) -> Vec<PageId>;

    /// Every known page of the given raw header type.
    fn pages_of_type(&self, page_type: PageType) -> Vec<PageId>;
}

/// One row of `sysschobjs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemObject {
    pub object_id: i32,
    pub schema_id: i32,
    pub name: String,
    /// Two-character type code; `'U'` first means user table.
    pub type_code: String,
}

impl SystemObject {
    /// Whether this object is a user table.
    #[must_use]
    pub fn is_user_table(&self) -> bool {
        self.type_code.starts_with('U')
    }
}

/// One row of `syscolpars`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemColumn {
    pub object_id: i32,
    pub column_id: i32,
    pub system_type_id: u8,
    pub max_length: i16,
    pub precision: u8,
    pub scale: u8,
    pub name: String,
}

/// A module (procedure / function / view) with its recovered definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemModule {
    pub object_id: i32,
    pub schema_name: String,
    pub name: String,
    pub type_code: String,
    pub definition: String,
}

/// The frozen catalog snapshot produced by [`CatalogScanner::scan`].
#[derive(Debug, Default)]
pub struct Catalog {
    objects: BTreeMap<i32, SystemObject>,
    columns: HashMap<i32, Vec<SystemColumn>>,
    obj_to_page_objid: HashMap<i32, u32>,
    modules: BTreeMap<i32, SystemModule>,
    schema_names: HashMap<i32, String>,
}

impl Catalog {
    /// Resolve `(schema, name)` to a full table schema.
    ///
    /// Name matching is case-insensitive; the schema matches against the
    /// seeded schema-name table with `dbo` as the default.
    pub fn resolve_table(&self, schema: &str, name: &str) -> Result<TableSchema> {
        for (&object_id, obj) in &self.objects {
            if !obj.is_user_table() || !obj.name.eq_ignore_ascii_case(name) {
                continue;
            }
            let obj_schema = self.schema_name_for_id(obj.schema_id);
            if !schema.is_empty() && !obj_schema.eq_ignore_ascii_case(schema) {
                continue;
            }

            let mut columns = Vec::new();
            if let Some(cols) = self.columns.get(&object_id) {
                for c in cols {
                    let Some(sql_type) = SqlType::from_raw(c.system_type_id) else {
                        warn!(
                            column = %c.name,
                            type_id = c.system_type_id,
                            "unknown column type id; skipping column"
                        );
                        continue;
                    };
                    columns.push(ColumnDef {
                        column_id: c.column_id,
                        name: c.name.clone(),
                        sql_type,
                        max_length: c.max_length,
                        precision: c.precision,
                        scale: c.scale,
                        is_nullable: true,
                        is_identity: false,
                        is_computed: false,
                        leaf_offset: 0,
                    });
                }
            }

            let resolved = TableSchema {
                object_id,
                schema_name: obj_schema.to_owned(),
                table_name: obj.name.clone(),
                columns,
                is_heap: true,
                partition_count: 1,
            };
            info!(
                table = %resolved.qualified_name(),
                object_id,
                columns = resolved.columns.len(),
                "resolved table"
            );
            return Ok(resolved);
        }
        Err(BakError::TableNotFound {
            schema: schema.to_owned(),
            table: name.to_owned(),
        })
    }

    /// All user tables, sorted by name.
    #[must_use]
    pub fn list_user_tables(&self) -> Vec<SystemObject> {
        let mut tables: Vec<SystemObject> = self
            .objects
            .values()
            .filter(|o| o.is_user_table())
            .cloned()
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// All recovered modules, sorted by schema then name.
    #[must_use]
    pub fn list_modules(&self) -> Vec<SystemModule> {
        let mut mods: Vec<SystemModule> = self.modules.values().cloned().collect();
        mods.sort_by(|a, b| (&a.schema_name, &a.name).cmp(&(&b.schema_name, &b.name)));
        mods
    }

    /// Page-header stamp for a resolved object; 0 when unknown.
    #[must_use]
    pub fn get_page_obj_id(&self, object_id: i32) -> u32 {
        self.obj_to_page_objid.get(&object_id).copied().unwrap_or(0)
    }

    /// Schema name for a schema id, defaulting to `dbo`.
    #[must_use]
    pub fn schema_name_for_id(&self, schema_id: i32) -> &str {
        self.schema_names
            .get(&schema_id)
            .map_or("dbo", String::as_str)
    }

    /// Raw object map (diagnostics).
    #[must_use]
    pub fn objects(&self) -> &BTreeMap<i32, SystemObject> {
        &self.objects
    }

    /// Raw per-object column lists (diagnostics).
    #[must_use]
    pub fn columns(&self) -> &HashMap<i32, Vec<SystemColumn>> {
        &self.columns
    }

    /// Raw `object_id → page obj_id` map (diagnostics).
    #[must_use]
    pub fn page_objid_map(&self) -> &HashMap<i32, u32> {
        &self.obj_to_page_objid
    }
}

/// Scans the page corpus into a [`Catalog`].
pub struct CatalogScanner<'s, S: PageStore> {
    store: &'s S,
}

impl<'s, S: PageStore> CatalogScanner<'s, S> {
    #[must_use]
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Run the full catalog scan.
    ///
    /// Pure over the store contents: scanning the same corpus twice
    /// yields identical maps.
    pub fn scan(&self) -> Result<Catalog> {
        info!("scanning system catalog");

        let mut catalog = Catalog {
            schema_names: seeded_schema_names(),
            ..Catalog::default()
        };

        self.check_boot_page();

        self.scan_objects(&mut catalog);
        if catalog.objects.is_empty() {
            return Err(BakError::format(
                "no system objects recovered from the page corpus",
            ));
        }
        self.scan_columns(&mut catalog);
        self.scan_rowset_allocunit_mapping(&mut catalog);
        self.scan_module_definitions(&mut catalog);

        info!(
            objects = catalog.objects.len(),
            column_sets = catalog.columns.len(),
            page_mappings = catalog.obj_to_page_objid.len(),
            modules = catalog.modules.len(),
            "catalog scan complete"
        );
        Ok(catalog)
    }

    /// The boot page is a fixed landmark; its absence usually means the
    /// scan missed the primary file, which is worth a loud warning.
    fn check_boot_page(&self) {
        let mut page = vec![0u8; PAGE_SIZE];
        if !self.store.read_page(PageId::BOOT, &mut page) {
            warn!("boot page (1:9) not in the page corpus");
            return;
        }
        match PageHeader::parse(&page) {
            Some(hdr) if hdr.page_type == PageType::Boot as u8 => {
                debug!(slots = hdr.slot_count, "boot page located");
            }
            _ => warn!("page (1:9) is present but is not a boot page"),
        }
    }

    /// Iterate every data-page slot of one system table.
    fn for_each_record(&self, obj_id: u32, mut f: impl FnMut(&[u8], usize)) {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut page_ids = self.store.pages_with_obj_id(obj_id);
        page_ids.sort_unstable_by_key(|id| id.key());

        for id in page_ids {
            if !self.store.read_page(id, &mut page) {
                continue;
            }
            let Some(hdr) = PageHeader::parse(&page) else {
                continue;
            };
            if !hdr.is_data() || hdr.slot_count == 0 || hdr.obj_id != obj_id {
                continue;
            }
            for slot in 0..hdr.slot_count as usize {
                let Some(offset) = slot_offset(&page, slot) else {
                    continue;
                };
                let offset = offset as usize;
                if offset < PAGE_HEADER_SIZE || offset >= PAGE_SIZE - 10 {
                    continue;
                }
                let status = page[offset];
                if status & RecordStatus::TYPE_MASK != RecordStatus::PRIMARY_RECORD {
                    continue;
                }
                f(&page, offset);
            }
        }
    }

    /// `sysschobjs`: object_id, schema_id, type code, name.
    fn scan_objects(&self, catalog: &mut Catalog) {
        let mut found = 0usize;
        self.for_each_record(OBJ_SYSSCHOBJS, |page, offset| {
            let rec = &page[offset..];
            let Some(fixed_end) = bakex_types::bytes::u16_at(rec, 2) else {
                return;
            };
            let fixed_end = fixed_end as usize;
            if fixed_end < 20 || fixed_end > PAGE_SIZE {
                return;
            }

            let (Some(object_id), Some(schema_id)) = (
                bakex_types::bytes::i32_at(rec, 4),
                bakex_types::bytes::i32_at(rec, 8),
            ) else {
                return;
            };
            // Plausibility gate before accepting the slot.
            if object_id <= 0 || schema_id <= 0 || schema_id > 65_536 {
                return;
            }

            let Some(name) = var_region_name(rec, fixed_end) else {
                return;
            };

            // Type code: char[2] at 17.
            let type_code = if fixed_end > 18 {
                String::from_utf8_lossy(&rec[17..19]).into_owned()
            } else {
                String::new()
            };

            debug!(object_id, schema_id, %type_code, %name, "system object");
            catalog.objects.insert(
                object_id,
                SystemObject {
                    object_id,
                    schema_id,
                    name,
                    type_code,
                },
            );
            found += 1;
        });
        info!(found, "sysschobjs scan done");
    }

    /// `syscolpars`: ordered column definitions per known object.
    fn scan_columns(&self, catalog: &mut Catalog) {
        let mut found = 0usize;
        self.for_each_record(OBJ_SYSCOLPARS, |page, offset| {
            let rec = &page[offset..];
            let Some(fixed_end) = bakex_types::bytes::u16_at(rec, 2) else {
                return;
            };
            let fixed_end = fixed_end as usize;
            if fixed_end < 23 {
                return;
            }

            let Some(object_id) = bakex_types::bytes::i32_at(rec, 4) else {
                return;
            };
            // Rows for unknown objects are procedure parameters or noise.
            if !catalog.objects.contains_key(&object_id) {
                return;
            }
            let Some(column_id) = bakex_types::bytes::i32_at(rec, 10) else {
                return;
            };
            if column_id <= 0 || column_id > 4096 {
                return;
            }

            let column = SystemColumn {
                object_id,
                column_id,
                system_type_id: rec[14],
                max_length: bakex_types::bytes::i16_at(rec, 19).unwrap_or(0),
                precision: rec[21],
                scale: rec[22],
                name: var_region_name(rec, fixed_end).unwrap_or_default(),
            };
            catalog.columns.entry(object_id).or_default().push(column);
            found += 1;
        });

        for cols in catalog.columns.values_mut() {
            cols.sort_by_key(|c| c.column_id);
        }
        info!(found, "syscolpars scan done");
    }

    /// `sysrowsets` ⋈ `sysallocunits` → `object_id → page obj_id`.
    fn scan_rowset_allocunit_mapping(&self, catalog: &mut Catalog) {
        // Step 1: rowset_id (hobt) → object_id, heap/clustered only.
        let mut rowset_to_object: HashMap<i64, i32> = HashMap::new();
        self.for_each_record(OBJ_SYSROWSETS, |page, offset| {
            let rec = &page[offset..];
            let Some(fixed_end) = bakex_types::bytes::u16_at(rec, 2) else {
                return;
            };
            if (fixed_end as usize) < 21 {
                return;
            }
            let (Some(rowset_id), Some(object_id), Some(index_id)) = (
                bakex_types::bytes::i64_at(rec, 4),
                bakex_types::bytes::i32_at(rec, 13),
                bakex_types::bytes::i32_at(rec, 17),
            ) else {
                return;
            };
            if index_id <= 1 && object_id > 0 {
                rowset_to_object.insert(rowset_id, object_id);
            }
        });
        debug!(rowsets = rowset_to_object.len(), "sysrowsets scan done");

        // Step 2: in-row allocation units joined through container_id.
        self.for_each_record(OBJ_SYSALLOCUNITS, |page, offset| {
            let rec = &page[offset..];
            let Some(fixed_end) = bakex_types::bytes::u16_at(rec, 2) else {
                return;
            };
            if (fixed_end as usize) < 21 {
                return;
            }
            let (Some(alloc_unit_id), Some(container_id)) = (
                bakex_types::bytes::i64_at(rec, 4),
                bakex_types::bytes::i64_at(rec, 13),
            ) else {
                return;
            };
            let unit_type = rec[12];
            // Type 1 = in-row data; the page stamp derives from the unit id.
            if unit_type != 1 {
                return;
            }
            let page_obj_id = ((alloc_unit_id >> 16) & 0xFFFF) as u32;
            if let Some(&object_id) = rowset_to_object.get(&container_id) {
                catalog.obj_to_page_objid.insert(object_id, page_obj_id);
            }
        });

        info!(
            mappings = catalog.obj_to_page_objid.len(),
            "object to page obj_id mapping built"
        );
        for (&object_id, &stamp) in &catalog.obj_to_page_objid {
            if let Some(obj) = catalog.objects.get(&object_id) {
                if obj.is_user_table() {
                    debug!(table = %obj.name, object_id, stamp, "user table page stamp");
                }
            }
        }
    }

    /// `sysobjvalues`: definitions of procedures, functions and views.
    fn scan_module_definitions(&self, catalog: &mut Catalog) {
        // Identify module objects first: P , FN, IF, TF, V .
        for obj in catalog.objects.values() {
            let is_module = matches!(obj.type_code.as_str(), "P " | "FN" | "IF" | "TF" | "V ");
            if is_module {
                catalog.modules.insert(
                    obj.object_id,
                    SystemModule {
                        object_id: obj.object_id,
                        schema_name: catalog
                            .schema_names
                            .get(&obj.schema_id)
                            .cloned()
                            .unwrap_or_else(|| "dbo".to_owned()),
                        name: obj.name.clone(),
                        type_code: obj.type_code.clone(),
                        definition: String::new(),
                    },
                );
            }
        }
        if catalog.modules.is_empty() {
            return;
        }

        let mut found = 0usize;
        let modules = &mut catalog.modules;
        self.for_each_record(OBJ_SYSOBJVALUES, |page, offset| {
            let rec = &page[offset..];
            let Some(fixed_end) = bakex_types::bytes::u16_at(rec, 2) else {
                return;
            };
            let fixed_end = fixed_end as usize;
            if fixed_end < 16 {
                return;
            }
            let (Some(object_id), Some(valclass)) = (
                bakex_types::bytes::i32_at(rec, 4),
                bakex_types::bytes::i16_at(rec, 8),
            ) else {
                return;
            };
            // valclass 1 carries the SQL definition text.
            if valclass != 1 {
                return;
            }
            let Some(module) = modules.get_mut(&object_id) else {
                return;
            };
            if let Some(definition) = extract_first_var_column(rec, fixed_end) {
                if !definition.is_empty() {
                    module.definition = definition;
                    found += 1;
                }
            }
        });
        info!(found, modules = catalog.modules.len(), "module definitions recovered");
    }
}

/// Follow IAM `next_page` links from `first` until the chain terminates.
///
/// Diagnostics only; capped to keep a corrupt loop from spinning.
#[must_use]
pub fn iam_chain<S: PageStore>(store: &S, first: PageId) -> Vec<PageId> {
    let mut chain = vec![first];
    let mut page = vec![0u8; PAGE_SIZE];
    let mut current = first;
    for _ in 0..10_000 {
        if !store.read_page(current, &mut page) {
            break;
        }
        let Some(hdr) = PageHeader::parse(&page) else {
            break;
        };
        let next = hdr.next();
        if next.is_null() {
            break;
        }
        chain.push(next);
        current = next;
    }
    chain
}

/// Every IAM page known to the store.
#[must_use]
pub fn iam_pages<S: PageStore>(store: &S) -> Vec<PageId> {
    store.pages_of_type(PageType::Iam)
}

/// Seeded schema names; user schemas beyond these default to `dbo`.
fn seeded_schema_names() -> HashMap<i32, String> {
    HashMap::from([
        (1, "dbo".to_owned()),
        (2, "guest".to_owned()),
        (3, "INFORMATION_SCHEMA".to_owned()),
        (4, "sys".to_owned()),
    ])
}
