use crate::common::*;

/// The generic axis-aligned rectangle.
pub trait Rect {
    type Type;

    fn x1(&self) -> Self::Type;
    fn y1(&self) -> Self::Type;
    fn x2(&self) -> Self::Type;
    fn y2(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn w(&self) -> Self::Type;
    fn h(&self) -> Self::Type;
}

pub trait RectFloat: Rect
where
    Self::Type: Float,
{
    fn area(&self) -> Self::Type {
        self.w() * self.h()
    }

    fn intersect_with<R>(&self, other: &R) -> Option<[Self::Type; 4]>
    where
        R: Rect<Type = Self::Type>,
    {
        let x1 = self.x1().max(other.x1());
        let y1 = self.y1().max(other.y1());
        let x2 = self.x2().min(other.x2());
        let y2 = self.y2().min(other.y2());
        (x2 > x1 && y2 > y1).then(|| [x1, y1, x2, y2])
    }

    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|[x1, y1, x2, y2]| (x2 - x1) * (y2 - y1))
            .unwrap_or_else(Self::Type::zero)
    }

    /// Intersection over union. Degenerate boxes have no overlap with
    /// anything, including themselves.
    fn iou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        if self.area() <= zero || other.area() <= zero {
            return zero;
        }
        let inter_area = self.intersection_area_with(other);
        let union_area = self.area() + other.area() - inter_area;
        inter_area / union_area
    }
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}
