use rand::Rng;
use std::ops::Range;

/// Generic 2d point
#[derive(Default, Debug, PartialEq, Clone, Copy)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn dist(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<(f64, f64)> for Point {
    fn from(tuple: (f64, f64)) -> Point {
        Point {
            x: tuple.0,
            y: tuple.1,
        }
    }
}

impl std::ops::Add for Point {
    type Output = Point;

    fn add(self, other: Point) -> Point {
        Point {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl std::ops::Sub for Point {
    type Output = Point;

    fn sub(self, other: Point) -> Point {
        Point {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl std::ops::Mul<f64> for Point {
    type Output = Point;

    fn mul(self, other: f64) -> Point {
        Point {
            x: self.x * other,
            y: self.y * other,
        }
    }
}

impl std::ops::AddAssign for Point {
    fn add_assign(&mut self, other: Point) {
        self.x += other.x;
        self.y += other.y;
    }
}

/// Position plus a heading in degrees.
///
/// A heading of 0° points along +y and headings grow toward +x, so a pose moving
/// at `speed` is displaced by `(sin(h), cos(h)) * speed`.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub heading: f64,
    pub position: Point,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Pose {
        Pose {
            heading: normalize_heading(heading),
            position: Point { x, y },
        }
    }

    /// Creates a random pose from uniform distribitions for each range
    pub fn random<R: Rng>(
        rng: &mut R,
        heading_range: Range<f64>,
        x_range: Range<f64>,
        y_range: Range<f64>,
    ) -> Pose {
        Pose {
            heading: rng.gen_range(heading_range),
            position: Point {
                x: rng.gen_range(x_range),
                y: rng.gen_range(y_range),
            },
        }
    }

    /// Wraps `heading` into `[0, 360)`
    pub fn normalize(mut self) -> Pose {
        self.heading = normalize_heading(self.heading);
        self
    }

    /// The pose reached by travelling `speed` units along the current heading.
    pub fn advanced(&self, speed: f64) -> Pose {
        let radians = self.heading.to_radians();
        Pose {
            heading: self.heading,
            position: self.position + Point::from((radians.sin(), radians.cos())) * speed,
        }
    }

    pub fn with_position(mut self, position: Point) -> Pose {
        self.position = position;
        self
    }
}

/// Wraps an angle in degrees into `[0, 360)`
pub fn normalize_heading(heading: f64) -> f64 {
    let wrapped = heading.rem_euclid(360.);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360. {
        0.
    } else {
        wrapped
    }
}

/// Clamps the `num` to the range `[lower, upper)`
///
/// If `T` is unsigned, do not use an `upper` of `0` because `upper` is tested exclusively
pub fn clamp<T>(num: T, lower: T, upper: Option<T>) -> T
where
    T: std::ops::Sub<Output = T> + From<i8> + PartialOrd,
{
    if num < lower {
        return lower;
    }
    if let Some(u) = upper {
        if num >= u {
            return u - 1i8.into();
        }
    }
    num
}
