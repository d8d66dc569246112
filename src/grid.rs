pub const GRID_COLUMNS: usize = 12;
pub const GRID_ROWS: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub x: f64,
    pub y: f64,
}

/// The stash tab area swept by a scan, split into 12 x 11 cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradingGrid {
    top_left: (f64, f64),
    cell_width: f64,
    cell_height: f64,
}

impl TradingGrid {
    pub fn new(top_left: (i32, i32), bottom_right: (i32, i32)) -> Self {
        let width = (bottom_right.0 - top_left.0).abs() as f64;
        let height = (bottom_right.1 - top_left.1).abs() as f64;
        Self {
            top_left: (top_left.0 as f64, top_left.1 as f64),
            cell_width: width / GRID_COLUMNS as f64,
            cell_height: height / GRID_ROWS as f64,
        }
    }

    pub fn cell_size(&self) -> (f64, f64) {
        (self.cell_width, self.cell_height)
    }

    /// Cell centres, row-major from the top-left cell.
    pub fn points(&self) -> Vec<GridPoint> {
        let mut out = Vec::with_capacity(GRID_COLUMNS * GRID_ROWS);
        let mut y = self.top_left.1 + (self.cell_height / 2.0).floor();
        for _ in 0..GRID_ROWS {
            let mut x = self.top_left.0 + (self.cell_width / 2.0).floor();
            for _ in 0..GRID_COLUMNS {
                out.push(GridPoint { x, y });
                x += self.cell_width;
            }
            y += self.cell_height;
        }
        out
    }
}
