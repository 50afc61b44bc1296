mod capability;
mod cursor;
mod predicate;
mod schema;
mod spatial_index;

pub use spatial_index::SpatialIndexState;

use crate::error::{Result, ViewError};
use crate::sql::{sql_count_view, sql_select_view, sql_select_view_by_id};
use crate::sql_functions::bounds_from_geometry;
use crate::types::{Capability, Envelope, FeatureSchema};
use geo_traits::GeometryTrait;
use std::fmt;
use wkb::reader::GeometryType;

use super::{DbOptions, Feature, ViewSource};
use capability::CapabilityInputs;
use cursor::{CursorManager, fetch_one};
use predicate::{FilterState, SpatialContext, build_where, spatial_predicate};
use schema::SchemaState;
use spatial_index::SpatialIndexProbe;

/// Catalog entry of a spatial view: which view column holds the geometry,
/// which one carries the underlying table's rowid, and where the geometry
/// comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    pub view_name: String,
    pub geometry_column: String,
    pub rowid_column: Option<String>,
    /// Table name, optionally written `table(geometry_column)`.
    pub underlying_table: String,
    pub underlying_geometry_column: String,
}

/// A read-only layer over a SQL view whose geometry is taken unchanged from
/// one geometry column of a physical table.
///
/// The schema is resolved on first use. If that fails, the failure is kept
/// for the lifetime of the layer and every read returns nothing.
///
/// Spatial filters are pushed down to the underlying table's R*Tree when the
/// view has a rowid column and the index exists, else to `ST_EnvIntersects`
/// when the spatial SQL functions are registered. Rows are checked against
/// the filter rectangle again while reading, so the features returned do not
/// depend on which strategy was used.
pub struct ViewLayer<'a> {
    source: &'a dyn ViewSource,
    definition: ViewDefinition,
    schema: SchemaState,
    spatial_index: SpatialIndexProbe,
    filter: FilterState,
    where_clause: String,
    cursor: CursorManager<'a>,
}

impl fmt::Debug for ViewLayer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewLayer")
            .field("definition", &self.definition)
            .field("schema", &self.schema)
            .field("spatial_index", &self.spatial_index.state())
            .field("filter", &self.filter)
            .field("where_clause", &self.where_clause)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl<'a> ViewLayer<'a> {
    pub fn new(source: &'a dyn ViewSource, definition: ViewDefinition) -> Self {
        let sql = sql_select_view(
            &definition.view_name,
            definition.rowid_column.as_deref(),
            "",
        );
        let cursor = CursorManager::new(
            source.connection(),
            sql,
            DbOptions::default().cursor_page_size,
        );
        Self {
            source,
            definition,
            schema: SchemaState::Unresolved,
            spatial_index: SpatialIndexProbe::default(),
            filter: FilterState::default(),
            where_clause: String::new(),
            cursor,
        }
    }

    /// Number of rows fetched per round trip. Values below 1 are raised to 1.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.cursor.set_page_size(page_size);
        self
    }

    pub fn definition(&self) -> &ViewDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.view_name
    }

    /// Field layout of the view. Empty if the schema could not be resolved.
    pub fn schema(&mut self) -> &FeatureSchema {
        self.ensure_resolved();
        self.schema.schema()
    }

    /// Why the schema could not be resolved, if it could not.
    pub fn schema_error(&mut self) -> Option<&ViewError> {
        self.ensure_resolved();
        self.schema.error()
    }

    /// Geometry type of the view, looked up on the underlying table when the
    /// schema has not been resolved yet. `None` means any geometry type.
    pub fn geometry_type(&self) -> Option<GeometryType> {
        match &self.schema {
            SchemaState::Resolved(view) => view.schema.geometry.as_ref()?.geometry_type,
            SchemaState::Failed { .. } => None,
            SchemaState::Unresolved => {
                let layer = schema::find_underlying_layer(self.source, &self.definition)
                    .ok()
                    .flatten()?;
                let layer_schema = layer.schema();
                let idx = layer_schema
                    .geometry_field_index(&self.definition.underlying_geometry_column)?;
                layer_schema.geometry_field(idx)?.geometry_type
            }
        }
    }

    pub fn spatial_index_state(&self) -> SpatialIndexState {
        self.spatial_index.state()
    }

    /// Current `WHERE ...` fragment, empty when no filter applies.
    pub fn where_clause(&self) -> &str {
        &self.where_clause
    }

    /// SQL of the cursor query.
    pub fn cursor_sql(&self) -> &str {
        self.cursor.sql()
    }

    pub fn attribute_filter(&self) -> &str {
        &self.filter.attribute
    }

    /// Rectangle of the installed spatial filter, infinite bounds clamped to
    /// the largest finite values.
    pub fn spatial_filter(&self) -> Option<Envelope> {
        self.filter.spatial
    }

    /// Restart reading from the first feature, preparing the cursor query now.
    pub fn reset_reading(&mut self) -> Result<()> {
        if !self.ensure_resolved() {
            return Ok(());
        }
        self.cursor.reset()
    }

    /// Read the next feature passing the installed filters.
    ///
    /// If the cursor query cannot be prepared the error is returned once and
    /// later calls return `None` until a filter changes or reading is reset.
    pub fn next_feature(&mut self) -> Result<Option<Feature>> {
        if !self.ensure_resolved() {
            return Ok(None);
        }
        self.read_next()
    }

    /// Iterate over the features from the first one.
    ///
    /// Example:
    /// ```no_run
    /// use rusqlite_spatial_view::SpatialDb;
    ///
    /// let db = SpatialDb::open_read_only("data/example.sqlite")?;
    /// let mut layer = db.open_view("parcels_view")?;
    /// layer.set_attribute_filter(Some("area > 100"));
    /// for feature in layer.features() {
    ///     let feature = feature?;
    ///     let _id = feature.id();
    ///     let _geom = feature.geometry()?;
    /// }
    /// # Ok::<(), rusqlite_spatial_view::ViewError>(())
    /// ```
    pub fn features(&mut self) -> ViewFeatures<'_, 'a> {
        self.cursor.rewind();
        ViewFeatures { layer: self }
    }

    /// Fetch a single feature by id without moving the reading position.
    ///
    /// With a rowid column this is one indexed lookup. Without one, ids are
    /// row positions and the lookup reads the view from the start until the
    /// id is found, honouring the installed filters. That costs a full scan
    /// per call.
    pub fn feature_by_id(&mut self, id: i64) -> Result<Option<Feature>> {
        if !self.ensure_resolved() {
            return Ok(None);
        }

        let Some(rowid_column) = self.definition.rowid_column.as_deref() else {
            let mut found = None;
            self.scan(|feature| {
                if feature.id() == id {
                    found = Some(feature);
                    true
                } else {
                    false
                }
            })?;
            return Ok(found);
        };

        let sql = sql_select_view_by_id(&self.definition.view_name, rowid_column, id);
        let resume = self.cursor.suspend();
        let result = match self.schema.resolved() {
            Some(view) => fetch_one(self.source.connection(), &sql, &view.reader, id),
            None => Ok(None),
        };
        self.cursor.restore(resume);
        result
    }

    /// Set the SQL expression rows must satisfy; `None` or an empty string
    /// removes it. Reading restarts from the first feature.
    pub fn set_attribute_filter(&mut self, query: Option<&str>) {
        self.filter.attribute = query.unwrap_or_default().to_string();
        self.rebuild_where();
    }

    /// Keep only features whose bounding box intersects the bounding box of
    /// `geometry`. Only its bounding box is retained; a geometry without
    /// coordinates clears the filter.
    pub fn set_spatial_filter<G>(&mut self, geom_field_index: usize, geometry: Option<&G>)
    where
        G: GeometryTrait<T = f64>,
    {
        let envelope = geometry.and_then(bounds_from_geometry);
        self.install_spatial_filter(geom_field_index, envelope);
    }

    /// Keep only features whose bounding box intersects the rectangle. A
    /// rectangle with a NaN bound clears the filter.
    pub fn set_spatial_filter_rect(
        &mut self,
        geom_field_index: usize,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) {
        let envelope = Envelope::new(min_x, min_y, max_x, max_y);
        self.install_spatial_filter(geom_field_index, Some(envelope));
    }

    pub fn clear_spatial_filter(&mut self) {
        self.install_spatial_filter(0, None);
    }

    /// Number of features passing the installed filters.
    ///
    /// Returns `-1` when the count is unknown: counting would need a full
    /// scan and `force` is false, or the count query failed. A layer whose
    /// schema could not be resolved has `0` features.
    pub fn feature_count(&mut self, force: bool) -> i64 {
        if !self.ensure_resolved() {
            return 0;
        }

        let spatial_filter = self.active_spatial_filter().is_some();
        let inputs = self.capability_inputs(spatial_filter);
        if capability::supports_fast_count(&inputs) {
            return self.count_with_sql();
        }
        if !force {
            tracing::debug!(view = %self.definition.view_name, "feature count needs a full scan");
            return -1;
        }

        let mut count = 0;
        match self.scan(|_| {
            count += 1;
            false
        }) {
            Ok(()) => count,
            Err(err) => {
                tracing::warn!(
                    view = %self.definition.view_name,
                    error = %err,
                    "cannot count view features"
                );
                -1
            }
        }
    }

    /// Test an OGR-style capability name such as `FastSpatialFilter`. Unknown
    /// names are not supported.
    pub fn test_capability(&mut self, name: &str) -> bool {
        match name.parse::<Capability>() {
            Ok(capability) => self.has_capability(capability),
            Err(_) => false,
        }
    }

    pub fn has_capability(&mut self, capability: Capability) -> bool {
        if !self.ensure_resolved() {
            return false;
        }
        let probe_index = match capability {
            Capability::FastSpatialFilter => true,
            Capability::FastFeatureCount => self.active_spatial_filter().is_some(),
            _ => false,
        };
        let inputs = self.capability_inputs(probe_index);
        capability::test_capability(capability, &inputs)
    }

    /// Resolve the schema on first use. Returns false if it is unavailable.
    fn ensure_resolved(&mut self) -> bool {
        if matches!(self.schema, SchemaState::Unresolved) {
            self.schema = match schema::resolve(self.source, &self.definition) {
                Ok(view) => {
                    tracing::debug!(
                        view = %self.definition.view_name,
                        fields = view.schema.fields.len(),
                        "resolved view schema"
                    );
                    SchemaState::Resolved(Box::new(view))
                }
                Err(reason) => {
                    tracing::warn!(
                        view = %self.definition.view_name,
                        error = %reason,
                        "cannot establish view schema"
                    );
                    SchemaState::Failed {
                        reason,
                        placeholder: FeatureSchema::empty(&self.definition.view_name),
                    }
                }
            };
        }
        matches!(self.schema, SchemaState::Resolved(_))
    }

    fn index_present(&mut self) -> bool {
        let Some(view) = self.schema.resolved() else {
            return false;
        };
        self.spatial_index.resolve(
            self.source.connection(),
            &view.underlying,
            self.definition.rowid_column.as_deref(),
        )
    }

    /// The spatial filter, if it targets a geometry field the view has.
    fn active_spatial_filter(&self) -> Option<Envelope> {
        let envelope = self.filter.spatial?;
        self.schema
            .resolved()?
            .schema
            .geometry_field(self.filter.geom_field_index)?;
        Some(envelope)
    }

    fn capability_inputs(&mut self, probe_index: bool) -> CapabilityInputs {
        let index_present = probe_index && self.index_present();
        CapabilityInputs {
            spatial_filter: self.active_spatial_filter().is_some(),
            has_geometry: self.schema.schema().geometry.is_some(),
            index_present,
            has_rowid_column: self.definition.rowid_column.is_some(),
        }
    }

    fn install_spatial_filter(&mut self, geom_field_index: usize, envelope: Option<Envelope>) {
        // Infinite bounds are clamped so the rectangle can always be written
        // into SQL. A NaN bound matches nothing, so such a filter is dropped.
        let envelope = match envelope {
            Some(requested) => {
                let finite = requested.to_finite();
                if finite.is_none() {
                    tracing::warn!(
                        view = %self.definition.view_name,
                        filter = ?requested,
                        "ignoring spatial filter with NaN bounds"
                    );
                }
                finite
            }
            None => None,
        };
        if self.filter.spatial == envelope && self.filter.geom_field_index == geom_field_index {
            return;
        }
        self.filter.spatial = envelope;
        self.filter.geom_field_index = geom_field_index;
        self.rebuild_where();
    }

    /// Recompute the WHERE fragment and hand the new query to the cursor,
    /// which restarts from the first row.
    fn rebuild_where(&mut self) {
        self.ensure_resolved();
        if self.filter.spatial.is_some() {
            self.index_present();
        }

        let spatial = self.schema.resolved().and_then(|view| {
            let ctx = SpatialContext {
                index: self.spatial_index.state(),
                spatial_functions: self.source.spatial_functions_available(),
                rowid_column: self.definition.rowid_column.as_deref(),
                geometry_column: view.schema.geometry.as_ref().map(|g| g.name.as_str()),
                underlying_table: &view.underlying.table_name,
                underlying_geometry_column: &view.underlying.geometry_column,
            };
            spatial_predicate(&self.filter, &ctx)
        });
        self.where_clause = build_where(spatial.as_deref(), &self.filter.attribute);

        let sql = sql_select_view(
            &self.definition.view_name,
            self.definition.rowid_column.as_deref(),
            &self.where_clause,
        );
        tracing::debug!(view = %self.definition.view_name, sql = %sql, "rebuilt view query");
        self.cursor.set_sql(sql);
    }

    fn read_next(&mut self) -> Result<Option<Feature>> {
        let filter = self.active_spatial_filter();
        let Some(view) = self.schema.resolved() else {
            return Ok(None);
        };
        loop {
            let Some(feature) = self.cursor.next(&view.reader)? else {
                return Ok(None);
            };
            if passes_spatial_filter(&feature, filter.as_ref()) {
                return Ok(Some(feature));
            }
        }
    }

    /// Read the current query from its first row, handing every feature that
    /// passes the filters to `visit` until it returns true. The reading
    /// position is restored afterwards.
    fn scan<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(Feature) -> bool,
    {
        let resume = self.cursor.suspend();
        self.cursor.rewind();
        let result = loop {
            match self.read_next() {
                Ok(Some(feature)) => {
                    if visit(feature) {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.cursor.restore(resume);
        result
    }

    fn count_with_sql(&self) -> i64 {
        let sql = sql_count_view(&self.definition.view_name, &self.where_clause);
        tracing::debug!(sql = %sql, "counting view features");

        let conn = self.source.connection();
        let mut stmt = match conn.prepare(&sql) {
            Ok(stmt) => stmt,
            Err(err) => {
                let err = ViewError::prepare(&sql, err);
                tracing::warn!(error = %err, "cannot count view features");
                return -1;
            }
        };
        match stmt.query_row([], |row| row.get::<_, i64>(0)) {
            Ok(count) => count,
            Err(err) => {
                let err = ViewError::CountParse(err.to_string());
                tracing::warn!(error = %err, "cannot read view feature count");
                -1
            }
        }
    }
}

fn passes_spatial_filter(feature: &Feature, filter: Option<&Envelope>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    match feature.envelope() {
        Ok(Some(envelope)) => envelope.intersects(filter),
        Ok(None) => false,
        Err(err) => {
            tracing::debug!(id = feature.id(), error = %err, "skipping undecodable geometry");
            false
        }
    }
}

/// Iterator over the features of a [`ViewLayer`], see [`ViewLayer::features`].
pub struct ViewFeatures<'l, 'a> {
    layer: &'l mut ViewLayer<'a>,
}

impl Iterator for ViewFeatures<'_, '_> {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        self.layer.next_feature().transpose()
    }
}
