//! Reading point sets with named per-point and per-cell arrays.
//!
//! The topology pipeline hands over VTK files (XML `.vtp`/`.vtu` or legacy
//! `.vtk`). Everything downstream only needs point coordinates, polygon
//! connectivity and scalar arrays looked up by name, so that is all a
//! [`PointSet`] keeps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use nalgebra::Point3;
use vtkio::model::{Attribute, Attributes, CellType, DataSet, IOBuffer, Piece, VertexNumbers};
use vtkio::Vtk;

use crate::contact::{ParticleId, RawSaddle};
use crate::error::{Result, StatsError};

#[cfg(test)]
mod tests {
    use super::*;

    fn contacts() -> PointSet {
        PointSet::new(vec![
            Point3::new(0.5, 0.0, 0.0),
            Point3::new(1.5, 0.0, 0.0),
        ])
        .with_point_array(CP_ID, vec![10.0, 12.0])
        .with_point_array(MAX_1, vec![1.0, 2.0])
        .with_point_array(MAX_2, vec![2.0, 3.0])
        .with_point_array(VAL, vec![1.0, 2.5])
    }

    #[test]
    fn saddles_from_named_arrays() {
        let saddles = raw_saddles(&contacts()).unwrap();
        assert_eq!(saddles.len(), 2);
        assert_eq!(saddles[1].contact_id, 12);
        assert_eq!((saddles[1].max_1, saddles[1].max_2), (2, 3));
        assert_eq!(saddles[1].value, 2.5);
        assert_eq!(saddles[1].position, Point3::new(1.5, 0.0, 0.0));
    }

    #[test]
    fn missing_array_is_a_format_error() {
        let set = PointSet::new(vec![Point3::origin()]).with_point_array(CP_ID, vec![1.0]);
        assert!(matches!(raw_saddles(&set), Err(StatsError::Format { .. })));
    }

    #[test]
    fn grouping_keeps_file_order() {
        let set = PointSet::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ])
        .with_point_array(CP_ID, vec![4.0, 2.0, 4.0]);
        let groups = group_points_by_id(&set, CP_ID).unwrap();
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(
            groups[&4],
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)]
        );
    }

    #[test]
    fn legacy_and_xml_connectivity_agree() {
        let path = Path::new("mem");
        let legacy = cells_from_vertex_numbers(
            path,
            VertexNumbers::Legacy {
                num_cells: 2,
                vertices: vec![3, 0, 1, 2, 4, 0, 2, 3, 4],
            },
        )
        .unwrap();
        let xml = cells_from_vertex_numbers(
            path,
            VertexNumbers::XML {
                connectivity: vec![0, 1, 2, 0, 2, 3, 4],
                offsets: vec![3, 7],
            },
        )
        .unwrap();
        assert_eq!(legacy, vec![vec![0, 1, 2], vec![0, 2, 3, 4]]);
        assert_eq!(legacy, xml);
    }

    fn write_input(test: &str, file: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("grainstat-{}-{}", test, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(file);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn remove_input(path: &Path) {
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    fn poly_data(pieces: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<VTKFile type="PolyData" version="1.0" byte_order="LittleEndian" header_type="UInt64">
  <PolyData>
{}
  </PolyData>
</VTKFile>
"#,
            pieces
        )
    }

    /// One piece holding a unit quad at height `z`, tagged with saddle `saddle`.
    fn quad_piece(z: f64, saddle: i64, connectivity: &str) -> String {
        format!(
            r#"    <Piece NumberOfPoints="4" NumberOfVerts="0" NumberOfLines="0" NumberOfStrips="0" NumberOfPolys="1">
      <PointData>
      </PointData>
      <CellData>
        <DataArray type="Int32" Name="CP ID" format="ascii">{saddle}</DataArray>
        <DataArray type="Int32" Name="RegionId" format="ascii">0</DataArray>
      </CellData>
      <Points>
        <DataArray type="Float64" NumberOfComponents="3" format="ascii">
          0 0 {z}  1 0 {z}  1 1 {z}  0 1 {z}
        </DataArray>
      </Points>
      <Polys>
        <DataArray type="Int64" Name="connectivity" format="ascii">{connectivity}</DataArray>
        <DataArray type="Int64" Name="offsets" format="ascii">4</DataArray>
      </Polys>
    </Piece>"#
        )
    }

    #[test]
    fn contacts_from_xml_poly_data() {
        let path = write_input(
            "contacts",
            "scan_contacts.vtp",
            &poly_data(
                r#"    <Piece NumberOfPoints="3" NumberOfVerts="3" NumberOfLines="0" NumberOfStrips="0" NumberOfPolys="0">
      <PointData>
        <DataArray type="Int32" Name="CP ID" format="ascii">10 11 12</DataArray>
        <DataArray type="Int32" Name="Max 1" format="ascii">1 1 2</DataArray>
        <DataArray type="Int32" Name="Max 2" format="ascii">2 2 3</DataArray>
        <DataArray type="Float32" Name="Val" format="ascii">1 4 2.5</DataArray>
      </PointData>
      <CellData>
      </CellData>
      <Points>
        <DataArray type="Float64" NumberOfComponents="3" format="ascii">
          0.5 0 0  0.5 0.1 0  1.5 0 0
        </DataArray>
      </Points>
      <Verts>
        <DataArray type="Int64" Name="connectivity" format="ascii">0 1 2</DataArray>
        <DataArray type="Int64" Name="offsets" format="ascii">1 2 3</DataArray>
      </Verts>
    </Piece>"#,
            ),
        );

        let set = PointSet::from_vtk(&path).unwrap();
        assert_eq!(set.source(), path.as_path());
        assert_eq!(set.cells, vec![vec![0], vec![1], vec![2]]);
        assert_eq!(set.cell_kinds, vec![CellKind::Vertex; 3]);

        let saddles = raw_saddles(&set).unwrap();
        assert_eq!(
            saddles
                .iter()
                .map(|s| (s.contact_id, s.max_1, s.max_2))
                .collect::<Vec<_>>(),
            vec![(10, 1, 2), (11, 1, 2), (12, 2, 3)]
        );
        assert_eq!(saddles[2].value, 2.5);
        assert_eq!(saddles[1].position, Point3::new(0.5, 0.1, 0.0));

        let owners = group_points_by_id(&set, MAX_1).unwrap();
        assert_eq!(owners[&1].len(), 2);
        assert_eq!(owners[&2], vec![Point3::new(1.5, 0.0, 0.0)]);

        remove_input(&path);
    }

    #[test]
    fn pieces_are_offset_into_one_set() {
        let path = write_input(
            "pieces",
            "scan_contact_regions.vtp",
            &poly_data(&format!(
                "{}\n{}",
                quad_piece(0.0, 10, "0 1 2 3"),
                quad_piece(1.0, 11, "0 1 2 3")
            )),
        );

        let set = PointSet::from_vtk(&path).unwrap();
        assert_eq!(set.points.len(), 8);
        assert_eq!(set.points[6], Point3::new(1.0, 1.0, 1.0));
        assert_eq!(set.cells, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
        assert_eq!(set.cell_kinds, vec![CellKind::Polygon; 2]);
        assert_eq!(set.cell_array(CP_ID).unwrap().values, vec![10.0, 11.0]);

        let regions = crate::region::ContactRegionMesh::from_point_set(&set).unwrap();
        assert_eq!(regions.quads[&10], vec![[0, 1, 2, 3]]);
        assert_eq!(regions.quads[&11], vec![[4, 5, 6, 7]]);

        remove_input(&path);
    }

    #[test]
    fn cell_past_the_piece_points_is_rejected() {
        let path = write_input(
            "bad-index",
            "scan_contact_regions.vtp",
            &poly_data(&quad_piece(0.0, 10, "0 1 2 7")),
        );

        match PointSet::from_vtk(&path) {
            Err(StatsError::Format { message, .. }) => {
                assert!(message.contains("references point 7 of 4"), "{}", message)
            }
            other => panic!("expected a format error, got {:?}", other),
        }

        remove_input(&path);
    }

    #[test]
    fn array_width_must_match_between_pieces() {
        let second = quad_piece(1.0, 11, "0 1 2 3").replace(
            r#"<DataArray type="Int32" Name="RegionId" format="ascii">0</DataArray>"#,
            r#"<DataArray type="Int32" Name="RegionId" NumberOfComponents="2" format="ascii">0 0</DataArray>"#,
        );
        let path = write_input(
            "width",
            "scan_contact_regions.vtp",
            &poly_data(&format!("{}\n{}", quad_piece(0.0, 10, "0 1 2 3"), second)),
        );

        match PointSet::from_vtk(&path) {
            Err(StatsError::Format { message, .. }) => {
                assert!(message.contains("changes width"), "{}", message)
            }
            other => panic!("expected a format error, got {:?}", other),
        }

        remove_input(&path);
    }

    #[test]
    fn legacy_polygons_with_field_data() {
        let path = write_input(
            "legacy",
            "regions.vtk",
            "# vtk DataFile Version 3.0\n\
             contact regions\n\
             ASCII\n\
             DATASET POLYDATA\n\
             POINTS 6 float\n\
             0 0 0 1 0 0 2 0 0\n\
             0 1 0 1 1 0 2 1 0\n\
             POLYGONS 2 10\n\
             4 0 1 4 3\n\
             4 1 2 5 4\n\
             CELL_DATA 2\n\
             SCALARS Val float 1\n\
             LOOKUP_TABLE default\n\
             0.5 1.5\n\
             FIELD FieldData 1\n\
             RegionId 1 2 int\n\
             3 5\n",
        );

        let set = PointSet::from_vtk(&path).unwrap();
        assert_eq!(set.points.len(), 6);
        assert_eq!(set.points[5], Point3::new(2.0, 1.0, 0.0));
        assert_eq!(set.cells, vec![vec![0, 1, 4, 3], vec![1, 2, 5, 4]]);
        assert_eq!(set.cell_kinds, vec![CellKind::Polygon; 2]);
        assert_eq!(set.cell_id(REGION_ID, 1).unwrap(), 5);
        assert_eq!(set.cell_value(VAL, 1).unwrap(), 1.5);
        assert!(set.point_arrays.is_empty());

        remove_input(&path);
    }

    #[test]
    fn missing_file() {
        let err = PointSet::from_vtk(Path::new("/no/such/contacts.vtp")).unwrap_err();
        assert!(matches!(err, StatsError::MissingFile(_)));
    }
}

/// Owner particle on one side of a saddle.
pub const MAX_1: &str = "Max 1";
/// Owner particle on the other side of a saddle.
pub const MAX_2: &str = "Max 2";
/// Scalar field value at a saddle.
pub const VAL: &str = "Val";
/// Critical point id: the saddle id in contact files, the particle id in
/// segmentation and maxima files.
pub const CP_ID: &str = "CP ID";
/// Connected-region id of a contact-region cell.
pub const REGION_ID: &str = "RegionId";

/// A flat numeric array with `components` values per tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedArray {
    pub values: Vec<f64>,
    pub components: usize,
}

impl NamedArray {
    pub fn scalar(values: Vec<f64>) -> Self {
        Self {
            values,
            components: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.components.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First component of tuple `i`.
    pub fn get(&self, i: usize) -> Option<f64> {
        self.values.get(i * self.components).copied()
    }
}

/// What a cell's vertex list describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CellKind {
    /// One or more isolated points.
    Vertex,
    /// An open polyline.
    Line,
    /// A closed polygon, vertices in boundary order.
    #[default]
    Polygon,
    /// A triangle strip: every consecutive vertex triple is a triangle.
    Strip,
    /// Any other cell (volumetric or higher order).
    Other,
}

impl CellKind {
    fn of_cell_type(cell_type: CellType) -> Self {
        match cell_type {
            CellType::Vertex | CellType::PolyVertex => CellKind::Vertex,
            CellType::Line | CellType::PolyLine => CellKind::Line,
            CellType::Triangle | CellType::Polygon | CellType::Quad | CellType::Pixel => {
                CellKind::Polygon
            }
            CellType::TriangleStrip => CellKind::Strip,
            _ => CellKind::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    pub points: Vec<Point3<f64>>,
    pub cells: Vec<Vec<usize>>,
    /// Kind of each entry of `cells`.
    pub cell_kinds: Vec<CellKind>,
    pub point_arrays: BTreeMap<String, NamedArray>,
    pub cell_arrays: BTreeMap<String, NamedArray>,
    source: PathBuf,
}

impl PointSet {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }

    pub fn with_point_array(mut self, name: &str, values: Vec<f64>) -> Self {
        self.point_arrays
            .insert(name.to_string(), NamedArray::scalar(values));
        self
    }

    /// Sets the cells, all of them polygons.
    pub fn with_cells(mut self, cells: Vec<Vec<usize>>) -> Self {
        self.cell_kinds = vec![CellKind::Polygon; cells.len()];
        self.cells = cells;
        self
    }

    pub fn with_typed_cells(mut self, cells: Vec<(CellKind, Vec<usize>)>) -> Self {
        let (kinds, cells): (Vec<_>, Vec<_>) = cells.into_iter().unzip();
        self.cell_kinds = kinds;
        self.cells = cells;
        self
    }

    /// Cells paired with their kind.
    pub fn typed_cells(&self) -> impl Iterator<Item = (CellKind, &[usize])> {
        self.cell_kinds
            .iter()
            .copied()
            .zip(self.cells.iter().map(Vec::as_slice))
    }

    pub fn with_cell_array(mut self, name: &str, values: Vec<f64>) -> Self {
        self.cell_arrays
            .insert(name.to_string(), NamedArray::scalar(values));
        self
    }

    /// File this set was read from, empty for in-memory sets.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn array_names(&self) -> impl Iterator<Item = &str> {
        self.point_arrays
            .keys()
            .chain(self.cell_arrays.keys())
            .map(String::as_str)
    }

    pub fn point(&self, i: usize) -> Result<Point3<f64>> {
        self.points.get(i).copied().ok_or(StatsError::Lookup {
            table: "points",
            id: i as i64,
        })
    }

    pub fn point_array(&self, name: &str) -> Result<&NamedArray> {
        self.point_arrays
            .get(name)
            .ok_or_else(|| self.missing_array("point", name))
    }

    pub fn cell_array(&self, name: &str) -> Result<&NamedArray> {
        self.cell_arrays
            .get(name)
            .ok_or_else(|| self.missing_array("cell", name))
    }

    pub fn point_value(&self, name: &str, i: usize) -> Result<f64> {
        self.point_array(name)?.get(i).ok_or(StatsError::Lookup {
            table: "point array",
            id: i as i64,
        })
    }

    pub fn cell_value(&self, name: &str, i: usize) -> Result<f64> {
        self.cell_array(name)?.get(i).ok_or(StatsError::Lookup {
            table: "cell array",
            id: i as i64,
        })
    }

    fn missing_array(&self, kind: &str, name: &str) -> StatsError {
        StatsError::format(&self.source, format!("no {} array named {:?}", kind, name))
    }

    /// Integer id stored in a float array.
    pub fn point_id(&self, name: &str, i: usize) -> Result<i64> {
        as_id(&self.source, name, self.point_value(name, i)?)
    }

    pub fn cell_id(&self, name: &str, i: usize) -> Result<i64> {
        as_id(&self.source, name, self.cell_value(name, i)?)
    }

    /// Reads every inline piece of a VTK poly data or unstructured grid file.
    pub fn from_vtk(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(StatsError::MissingFile(path.to_path_buf()));
        }
        let vtk = Vtk::import(path).map_err(|e| StatsError::format(path, format!("{:?}", e)))?;

        let mut set = PointSet {
            source: path.to_path_buf(),
            ..Default::default()
        };

        match vtk.data {
            DataSet::PolyData { pieces, .. } => {
                for piece in pieces {
                    let Piece::Inline(piece) = piece else {
                        return Err(StatsError::format(path, "external pieces are not supported"));
                    };
                    let piece = *piece;
                    // cell data follows this block order
                    let mut cells = Vec::new();
                    for (kind, topology) in [
                        (CellKind::Vertex, piece.verts),
                        (CellKind::Line, piece.lines),
                        (CellKind::Polygon, piece.polys),
                        (CellKind::Strip, piece.strips),
                    ] {
                        let Some(topology) = topology else { continue };
                        cells.extend(
                            cells_from_vertex_numbers(path, topology)?
                                .into_iter()
                                .map(|cell| (kind, cell)),
                        );
                    }
                    set.append(path, &piece.points, cells, &piece.data)?;
                }
            }
            DataSet::UnstructuredGrid { pieces, .. } => {
                for piece in pieces {
                    let Piece::Inline(piece) = piece else {
                        return Err(StatsError::format(path, "external pieces are not supported"));
                    };
                    let piece = *piece;
                    let verts = cells_from_vertex_numbers(path, piece.cells.cell_verts)?;
                    if verts.len() != piece.cells.types.len() {
                        return Err(StatsError::format(
                            path,
                            format!(
                                "{} cells but {} cell types",
                                verts.len(),
                                piece.cells.types.len()
                            ),
                        ));
                    }
                    let cells = piece
                        .cells
                        .types
                        .iter()
                        .zip(verts)
                        .map(|(&cell_type, mut cell)| {
                            if matches!(cell_type, CellType::Pixel) && cell.len() == 4 {
                                // pixels are stored in raster order
                                cell.swap(2, 3);
                            }
                            (CellKind::of_cell_type(cell_type), cell)
                        })
                        .collect();
                    set.append(path, &piece.points, cells, &piece.data)?;
                }
            }
            _ => {
                return Err(StatsError::format(
                    path,
                    "expected poly data or an unstructured grid",
                ))
            }
        }

        debug!(
            "read {}: {} points, {} cells, arrays {:?}",
            path.display(),
            set.points.len(),
            set.cells.len(),
            set.array_names().collect::<Vec<_>>()
        );

        Ok(set)
    }

    /// Appends one piece, offsetting its connectivity by the points already held.
    fn append(
        &mut self,
        path: &Path,
        points: &IOBuffer,
        cells: Vec<(CellKind, Vec<usize>)>,
        data: &Attributes,
    ) -> Result<()> {
        let coords = buffer_to_f64(points)
            .ok_or_else(|| StatsError::format(path, "unsupported point coordinate type"))?;
        if coords.len() % 3 != 0 {
            return Err(StatsError::format(path, "point coordinates are not triples"));
        }
        let offset = self.points.len();
        let num_points = coords.len() / 3;
        self.points.extend(
            coords
                .chunks_exact(3)
                .map(|c| Point3::new(c[0], c[1], c[2])),
        );

        let num_cells = cells.len();
        for (kind, cell) in cells {
            if let Some(&bad) = cell.iter().find(|&&i| i >= num_points) {
                return Err(StatsError::format(
                    path,
                    format!("cell references point {} of {}", bad, num_points),
                ));
            }
            self.cells.push(cell.into_iter().map(|i| i + offset).collect());
            self.cell_kinds.push(kind);
        }

        merge_attributes(path, &mut self.point_arrays, &data.point, num_points)?;
        merge_attributes(path, &mut self.cell_arrays, &data.cell, num_cells)?;
        Ok(())
    }
}

fn as_id(path: &Path, name: &str, value: f64) -> Result<i64> {
    if value.is_finite() {
        Ok(value.round() as i64)
    } else {
        Err(StatsError::format(
            path,
            format!("non-finite id {} in array {:?}", value, name),
        ))
    }
}

fn merge_attributes(
    path: &Path,
    arrays: &mut BTreeMap<String, NamedArray>,
    attributes: &[Attribute],
    num_tuples: usize,
) -> Result<()> {
    for attribute in attributes {
        let (name, buffer) = match attribute {
            Attribute::DataArray(array) => (array.name.as_str(), &array.data),
            Attribute::Field { data_array, .. } => {
                for field in data_array {
                    append_array(path, arrays, &field.name, &field.data, num_tuples)?;
                }
                continue;
            }
        };
        append_array(path, arrays, name, buffer, num_tuples)?;
    }
    Ok(())
}

fn append_array(
    path: &Path,
    arrays: &mut BTreeMap<String, NamedArray>,
    name: &str,
    buffer: &IOBuffer,
    num_tuples: usize,
) -> Result<()> {
    let Some(values) = buffer_to_f64(buffer) else {
        warn!("{}: skipping array {:?} of unsupported type", path.display(), name);
        return Ok(());
    };
    if num_tuples == 0 {
        return Ok(());
    }
    if values.len() % num_tuples != 0 {
        return Err(StatsError::format(
            path,
            format!(
                "array {:?} has {} values for {} tuples",
                name,
                values.len(),
                num_tuples
            ),
        ));
    }
    let components = values.len() / num_tuples;
    let entry = arrays.entry(name.to_string()).or_insert(NamedArray {
        values: Vec::new(),
        components,
    });
    if entry.components != components {
        return Err(StatsError::format(
            path,
            format!("array {:?} changes width between pieces", name),
        ));
    }
    entry.values.extend(values);
    Ok(())
}

fn buffer_to_f64(buffer: &IOBuffer) -> Option<Vec<f64>> {
    fn widen<T: Copy + Into<f64>>(v: &[T]) -> Vec<f64> {
        v.iter().map(|&x| x.into()).collect()
    }
    #[allow(unreachable_patterns)]
    let values = match buffer {
        IOBuffer::Bit(v) | IOBuffer::U8(v) => widen(v),
        IOBuffer::I8(v) => widen(v),
        IOBuffer::U16(v) => widen(v),
        IOBuffer::I16(v) => widen(v),
        IOBuffer::U32(v) => widen(v),
        IOBuffer::I32(v) => widen(v),
        IOBuffer::U64(v) => v.iter().map(|&x| x as f64).collect(),
        IOBuffer::I64(v) => v.iter().map(|&x| x as f64).collect(),
        IOBuffer::F32(v) => widen(v),
        IOBuffer::F64(v) => v.clone(),
        _ => return None,
    };
    Some(values)
}

fn cells_from_vertex_numbers(path: &Path, topology: VertexNumbers) -> Result<Vec<Vec<usize>>> {
    match topology {
        VertexNumbers::Legacy {
            num_cells,
            vertices,
        } => {
            // [n, i_0 .. i_n-1, n, ...]
            let mut cells = Vec::with_capacity(num_cells as usize);
            let mut rest = vertices.as_slice();
            while let Some((&n, tail)) = rest.split_first() {
                let n = n as usize;
                if tail.len() < n {
                    return Err(StatsError::format(path, "truncated legacy cell list"));
                }
                cells.push(tail[..n].iter().map(|&i| i as usize).collect());
                rest = &tail[n..];
            }
            Ok(cells)
        }
        VertexNumbers::XML {
            connectivity,
            offsets,
        } => {
            let mut cells = Vec::with_capacity(offsets.len());
            let mut start = 0usize;
            for &end in &offsets {
                let end = end as usize;
                if end < start || end > connectivity.len() {
                    return Err(StatsError::format(path, "cell offsets out of range"));
                }
                cells.push(connectivity[start..end].iter().map(|&i| i as usize).collect());
                start = end;
            }
            Ok(cells)
        }
    }
}

/// One raw record per point of a contact file.
pub fn raw_saddles(set: &PointSet) -> Result<Vec<RawSaddle>> {
    (0..set.points.len())
        .map(|i| {
            Ok(RawSaddle {
                contact_id: set.point_id(CP_ID, i)?,
                max_1: set.point_id(MAX_1, i)?,
                max_2: set.point_id(MAX_2, i)?,
                position: set.points[i],
                value: set.point_value(VAL, i)?,
            })
        })
        .collect()
}

/// Points grouped by an integer id array, in file order within each group.
pub fn group_points_by_id(
    set: &PointSet,
    array: &str,
) -> Result<BTreeMap<ParticleId, Vec<Point3<f64>>>> {
    let mut groups: BTreeMap<ParticleId, Vec<Point3<f64>>> = BTreeMap::new();
    for (i, point) in set.points.iter().enumerate() {
        groups
            .entry(set.point_id(array, i)?)
            .or_default()
            .push(*point);
    }
    Ok(groups)
}
