// A* path planning over a uniform grid laid on the arena.
//
// The robot consumes planners through the `PathPlanner` trait: start point,
// goal point, footprint and obstacle segments in, an ordered route out (empty
// when no route exists). `GridAStar` is the implementation the context uses.
//
// `GridAStar` places a node every `grid_step` pixels across the world bounds
// and connects each node to its 8 neighbours. A node is blocked when it lies
// within the footprint's clearance radius (half its diagonal plus one grid
// step) of any obstacle segment. Around the start the rule is relaxed: a
// node within one clearance radius of the start is open as long as it is no
// closer to an obstacle than the start itself, so a robot touching a wall
// can still back away.
//
// The open set is a `BinaryHeap` with reversed ordering and scores live in
// `Vec`s indexed by node, so results are deterministic. The heuristic is
// octile distance, which is admissible on this grid.
//
// The returned route starts at the grid node nearest `start` and ends with
// the exact `goal` point.
//
// See also: `world.rs` (`World::obstacles_for`) for where obstacles come
// from, `drive.rs` which walks the route by index.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::geometry::Segment;
use crate::types::{Point, Size};

pub trait PathPlanner: Send + Sync {
    /// Route from `start` to `goal` for a robot of `footprint`, avoiding
    /// `obstacles`. Empty when no route exists.
    fn search(&self, start: Point, goal: Point, footprint: Size, obstacles: &[Segment])
    -> Vec<Point>;
}

/// Entry in the A* open set (min-heap via reversed ordering).
struct OpenEntry {
    node: usize,
    f_score: f64,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f_score.total_cmp(&other.f_score) == Ordering::Equal && self.node == other.node
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap: smallest f_score is "greatest".
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| other.node.cmp(&self.node))
    }
}

const NEIGHBOURS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

#[derive(Clone, Debug)]
pub struct GridAStar {
    width: i32,
    height: i32,
    grid_step: i32,
}

impl GridAStar {
    /// A planner covering `[0, width] x [0, height]`. `grid_step` is clamped
    /// to at least one pixel.
    pub fn new(width: i32, height: i32, grid_step: i32) -> Self {
        Self {
            width: width.max(0),
            height: height.max(0),
            grid_step: grid_step.max(1),
        }
    }

    fn columns(&self) -> i32 {
        self.width / self.grid_step + 1
    }

    fn rows(&self) -> i32 {
        self.height / self.grid_step + 1
    }

    /// Nearest grid node to `p`, clamped into the grid.
    fn snap(&self, p: Point) -> (i32, i32) {
        let col = ((f64::from(p.x) / f64::from(self.grid_step)).round() as i32)
            .clamp(0, self.columns() - 1);
        let row = ((f64::from(p.y) / f64::from(self.grid_step)).round() as i32)
            .clamp(0, self.rows() - 1);
        (col, row)
    }

    fn index(&self, col: i32, row: i32) -> usize {
        (row * self.columns() + col) as usize
    }

    fn cell(&self, index: usize) -> (i32, i32) {
        let index = index as i32;
        (index % self.columns(), index / self.columns())
    }

    fn point(&self, index: usize) -> Point {
        let (col, row) = self.cell(index);
        Point::new(col * self.grid_step, row * self.grid_step)
    }

    /// Octile distance between two nodes, in pixels.
    fn heuristic(&self, from: usize, to: usize) -> f64 {
        let (ac, ar) = self.cell(from);
        let (bc, br) = self.cell(to);
        let dx = f64::from((ac - bc).abs());
        let dy = f64::from((ar - br).abs());
        let (long, short) = if dx > dy { (dx, dy) } else { (dy, dx) };
        (long + (std::f64::consts::SQRT_2 - 1.0) * short) * f64::from(self.grid_step)
    }
}

impl PathPlanner for GridAStar {
    fn search(
        &self,
        start: Point,
        goal: Point,
        footprint: Size,
        obstacles: &[Segment],
    ) -> Vec<Point> {
        if self.width == 0 || self.height == 0 {
            return Vec::new();
        }
        let n = (self.columns() * self.rows()) as usize;
        // One grid step of slack absorbs the rounding of rotated corners.
        let clearance = footprint.half_diagonal() + f64::from(self.grid_step);
        let start_node = {
            let (col, row) = self.snap(start);
            self.index(col, row)
        };
        let goal_node = {
            let (col, row) = self.snap(goal);
            self.index(col, row)
        };

        let nearest_obstacle = |p: Point| -> f64 {
            obstacles
                .iter()
                .map(|o| o.distance_to(p))
                .fold(f64::INFINITY, f64::min)
        };
        let start_gap = nearest_obstacle(start);

        // Lazily filled: None = not yet tested.
        let mut blocked: Vec<Option<bool>> = vec![None; n];
        blocked[start_node] = Some(false);
        let mut is_blocked = |node: usize| -> bool {
            *blocked[node].get_or_insert_with(|| {
                let p = self.point(node);
                let gap = nearest_obstacle(p);
                if gap >= clearance {
                    return false;
                }
                !(p.distance(start) <= clearance && gap >= start_gap)
            })
        };
        if is_blocked(goal_node) {
            return Vec::new();
        }
        if start_node == goal_node {
            return vec![self.point(start_node), goal];
        }

        // g_score[node] = cost of cheapest known path from start to node.
        let mut g_score = vec![f64::INFINITY; n];
        let mut came_from: Vec<Option<usize>> = vec![None; n];
        let mut closed = vec![false; n];

        g_score[start_node] = 0.0;
        let mut open = BinaryHeap::new();
        open.push(OpenEntry {
            node: start_node,
            f_score: self.heuristic(start_node, goal_node),
        });

        while let Some(current) = open.pop() {
            let ci = current.node;
            if ci == goal_node {
                let mut route = reconstruct_path(&came_from, start_node, goal_node)
                    .into_iter()
                    .map(|node| self.point(node))
                    .collect::<Vec<_>>();
                if route.last() != Some(&goal) {
                    route.push(goal);
                }
                return route;
            }
            if closed[ci] {
                continue;
            }
            closed[ci] = true;

            let (col, row) = self.cell(ci);
            let current_g = g_score[ci];
            for (dc, dr) in NEIGHBOURS {
                let (nc, nr) = (col + dc, row + dr);
                if nc < 0 || nr < 0 || nc >= self.columns() || nr >= self.rows() {
                    continue;
                }
                let ni = self.index(nc, nr);
                if closed[ni] || is_blocked(ni) {
                    continue;
                }
                let step = if dc != 0 && dr != 0 {
                    std::f64::consts::SQRT_2
                } else {
                    1.0
                };
                let tentative_g = current_g + step * f64::from(self.grid_step);
                if tentative_g < g_score[ni] {
                    g_score[ni] = tentative_g;
                    came_from[ni] = Some(ci);
                    open.push(OpenEntry {
                        node: ni,
                        f_score: tentative_g + self.heuristic(ni, goal_node),
                    });
                }
            }
        }

        Vec::new() // No path found.
    }
}

/// Walk came_from back from goal to start.
fn reconstruct_path(came_from: &[Option<usize>], start: usize, goal: usize) -> Vec<usize> {
    let mut nodes = Vec::new();
    let mut current = goal;
    loop {
        nodes.push(current);
        if current == start {
            break;
        }
        match came_from[current] {
            Some(prev) => current = prev,
            None => break,
        }
    }
    nodes.reverse();
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> GridAStar {
        GridAStar::new(500, 500, 2)
    }

    fn footprint() -> Size {
        Size::new(20, 20)
    }

    fn clearance_ok(route: &[Point], obstacles: &[Segment], min: f64) -> bool {
        route
            .iter()
            .all(|p| obstacles.iter().all(|o| o.distance_to(*p) >= min))
    }

    #[test]
    fn open_field_route_ends_at_goal() {
        let route = planner().search(Point::new(50, 50), Point::new(100, 50), footprint(), &[]);
        assert_eq!(route.first(), Some(&Point::new(50, 50)));
        assert_eq!(route.last(), Some(&Point::new(100, 50)));
        // Straight line along the row: 26 nodes, the last one is the goal.
        assert_eq!(route.len(), 26);
        assert!(route.iter().all(|p| p.y == 50));
    }

    #[test]
    fn route_steers_around_wall() {
        let wall = Segment::new(Point::new(7, 234), Point::new(419, 234));
        let route = planner().search(
            Point::new(163, 111),
            Point::new(320, 285),
            footprint(),
            &[wall],
        );
        assert!(!route.is_empty());
        assert_eq!(route.last(), Some(&Point::new(320, 285)));
        // The route must pass beyond the wall's open end.
        assert!(route.iter().any(|p| p.x > 419));
        assert!(clearance_ok(&route[..route.len() - 1], &[wall], footprint().half_diagonal()));
        // No consecutive pair of points crosses the wall.
        assert!(route.windows(2).all(|w| !Segment::new(w[0], w[1]).intersects(&wall)));
    }

    #[test]
    fn enclosed_goal_has_no_route() {
        let walls = [
            Segment::new(Point::new(200, 200), Point::new(300, 200)),
            Segment::new(Point::new(300, 200), Point::new(300, 300)),
            Segment::new(Point::new(300, 300), Point::new(200, 300)),
            Segment::new(Point::new(200, 300), Point::new(200, 200)),
        ];
        let route = planner().search(Point::new(50, 50), Point::new(250, 250), footprint(), &walls);
        assert!(route.is_empty());
    }

    #[test]
    fn goal_on_a_wall_is_unreachable() {
        let wall = Segment::new(Point::new(0, 100), Point::new(500, 100));
        let route = planner().search(Point::new(50, 50), Point::new(250, 101), footprint(), &[wall]);
        assert!(route.is_empty());
    }

    #[test]
    fn start_touching_wall_can_leave() {
        let wall = Segment::new(Point::new(0, 100), Point::new(500, 100));
        let route = planner().search(Point::new(250, 95), Point::new(250, 40), footprint(), &[wall]);
        assert!(!route.is_empty());
        // Never closer to the wall than where it started.
        assert!(route.iter().all(|p| p.y <= 96));
    }

    #[test]
    fn same_cell_returns_start_and_goal() {
        let route = planner().search(Point::new(10, 10), Point::new(9, 10), footprint(), &[]);
        assert_eq!(route, vec![Point::new(10, 10), Point::new(9, 10)]);
    }

    #[test]
    fn search_is_deterministic() {
        let wall = Segment::new(Point::new(0, 160), Point::new(300, 160));
        let a = planner().search(Point::new(150, 110), Point::new(450, 450), footprint(), &[wall]);
        let b = planner().search(Point::new(150, 110), Point::new(450, 450), footprint(), &[wall]);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
