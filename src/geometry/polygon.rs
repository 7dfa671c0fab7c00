use super::point::{Point, Segment};

/// Closed edge list of a polygon, last vertex joined back to the first.
fn edges(polygon: &[Point]) -> impl Iterator<Item = Segment> + '_ {
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(a, b)| Segment::new(*a, *b))
}

/// Whether a rightward horizontal ray from `point` crosses `edge`.
///
/// Horizontal edges never count. An edge whose endpoint sits exactly on the
/// ray's row only counts when the edge extends below that row, so a vertex
/// shared by two edges is counted once.
fn ray_crosses(point: Point, edge: &Segment) -> bool {
    let (s, e) = (edge.start, edge.end);
    if s.y == e.y {
        return false;
    }
    if s.x < point.x && e.x < point.x {
        return false;
    }
    if (s.y > point.y && e.y > point.y) || (s.y < point.y && e.y < point.y) {
        return false;
    }
    if (s.y == point.y && e.y > point.y) || (e.y == point.y && s.y > point.y) {
        return false;
    }
    let node_x = e.x as f64
        - (e.y - point.y) as f64 * (e.x - s.x) as f64 / (e.y - s.y) as f64;
    node_x >= point.x as f64
}

/// Ray-casting point-in-polygon test; boundary points are inside.
///
/// Polygons with fewer than three vertices never match.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut crossings = 0usize;
    for edge in edges(polygon) {
        if edge.contains(point) {
            return true;
        }
        if ray_crosses(point, &edge) {
            crossings += 1;
        }
    }
    crossings % 2 == 1
}
