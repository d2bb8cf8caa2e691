//! Residual CNN for MR image classification
//!
//! A compact ResNet: a 3x3 stem, four stages of one basic residual block each
//! (the last three halve the resolution and double the width), global average
//! pooling and a dropout + linear head. Works for any square input size.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::training::burn_adapter::LogitsModel;

/// Configuration for the MrClassifier model
#[derive(Config, Debug)]
pub struct MrClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Number of input channels (1 for single-sequence grayscale MR slices)
    #[config(default = "1")]
    pub in_channels: usize,

    /// Width of the first stage; doubled at every following stage
    #[config(default = "16")]
    pub base_filters: usize,

    /// Dropout rate before the classifier head
    #[config(default = "0.3")]
    pub dropout: f64,
}

impl MrClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MrClassifier<B> {
        MrClassifier::new(self, device)
    }
}

/// 1x1 projection matching the shortcut to a block's output shape
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

/// Basic residual block: two 3x3 conv + batch-norm layers and a shortcut
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(out_channels).init(device);

        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn2 = BatchNormConfig::new(out_channels).init(device);

        let downsample = if stride != 1 || in_channels != out_channels {
            Some(Downsample {
                conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                    .with_stride([stride, stride])
                    .with_bias(false)
                    .init(device),
                bn: BatchNormConfig::new(out_channels).init(device),
            })
        } else {
            None
        };

        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(ds) => ds.bn.forward(ds.conv.forward(x.clone())),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));

        self.relu.forward(out + identity)
    }
}

/// MR sequence classifier
#[derive(Module, Debug)]
pub struct MrClassifier<B: Backend> {
    stem: Conv2d<B>,
    stem_bn: BatchNorm<B>,
    stem_pool: MaxPool2d,
    stage1: ResidualBlock<B>,
    stage2: ResidualBlock<B>,
    stage3: ResidualBlock<B>,
    stage4: ResidualBlock<B>,
    global_pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    fc: Linear<B>,
    relu: Relu,
    num_classes: usize,
}

impl<B: Backend> MrClassifier<B> {
    pub fn new(config: &MrClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        let stem = Conv2dConfig::new([config.in_channels, base], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let stem_bn = BatchNormConfig::new(base).init(device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        Self {
            stem,
            stem_bn,
            stem_pool,
            stage1: ResidualBlock::new(base, base, 1, device),
            stage2: ResidualBlock::new(base, base * 2, 2, device),
            stage3: ResidualBlock::new(base * 2, base * 4, 2, device),
            stage4: ResidualBlock::new(base * 4, base * 8, 2, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(config.dropout).init(),
            fc: LinearConfig::new(base * 8, config.num_classes).init(device),
            relu: Relu::new(),
            num_classes: config.num_classes,
        }
    }

    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, channels, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.stem_bn.forward(self.stem.forward(x)));
        let x = self.stem_pool.forward(x);

        let x = self.stage1.forward(x);
        let x = self.stage2.forward(x);
        let x = self.stage3.forward(x);
        let x = self.stage4.forward(x);

        // [B, C, H, W] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.fc.forward(self.dropout.forward(x))
    }

    /// Class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<B: Backend> LogitsModel<B> for MrClassifier<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}
