/// Time primitives
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Default)]
pub struct Time(pub f64); // seconds

impl Time {
    pub fn seconds(self) -> f64 {
        self.0
    }

    pub fn since(self, earlier: Time) -> f64 {
        (self.0 - earlier.0).max(0.0)
    }
}

impl std::ops::Add<f64> for Time {
    type Output = Time;

    fn add(self, dt: f64) -> Time {
        Time(self.0 + dt)
    }
}

#[cfg(test)]
mod tests {
    use super::Time;

    #[test]
    fn since_never_goes_negative() {
        assert_eq!(Time(3.0).since(Time(1.0)), 2.0);
        assert_eq!(Time(1.0).since(Time(3.0)), 0.0);
        assert_eq!((Time(1.0) + 0.5).seconds(), 1.5);
    }
}
